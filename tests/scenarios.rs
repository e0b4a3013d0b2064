//! Cross-module end-to-end scenarios (§8 S1-S5; S6 is covered at the unit
//! level in `actuation::mod::tests` since it only touches the locks
//! database).

use cfengine_core::expr::class_expr;
use cfengine_core::expr::string_expr::RefKind;
use cfengine_core::expr::varref;
use cfengine_core::expr::Tristate;
use cfengine_core::kv::{merge_legacy_checksums_and_filestats, DbName, Handle, OpenOutcome, Store};
use cfengine_core::netcache::{ConnectionFlags, ConnectionHandle, Pool};
use std::cmp::Ordering;

fn open(dir: &std::path::Path, name: DbName) -> std::sync::Arc<Handle> {
    let store = Store::new(dir);
    match store.open(name).unwrap() {
        OpenOutcome::Open(h) => h,
        OpenOutcome::Broken => panic!("{} reported broken on fresh open", name.file_name()),
    }
}

/// S1: merging the legacy checksums/filestats databases into one combined
/// handle namespaces each source's keys so they can never collide, and
/// carries every record across untouched.
#[test]
fn s1_legacy_checksums_and_filestats_merge_into_combined_db() {
    let dir = tempfile::tempdir().unwrap();

    let checksums = open(dir.path(), DbName::Checksums);
    let checksum_key = b"MD5\0\0\0\0\0/etc/hosts";
    checksums.write(checksum_key, b"0001").unwrap();

    let filestats = open(dir.path(), DbName::Filestats);
    let stat_key = b"/etc/hosts";
    let stat_value = [7u8; 20];
    filestats.write(stat_key, &stat_value).unwrap();

    let dest = open(dir.path(), DbName::State);
    merge_legacy_checksums_and_filestats(&checksums, &filestats, &dest).unwrap();

    let mut combined_checksum_key = b"H_".to_vec();
    combined_checksum_key.extend_from_slice(checksum_key);
    assert_eq!(dest.read(&combined_checksum_key).unwrap().as_deref(), Some(b"0001".as_slice()));

    let mut combined_stat_key = b"S_".to_vec();
    combined_stat_key.extend_from_slice(stat_key);
    assert_eq!(dest.read(&combined_stat_key).unwrap().as_deref(), Some(stat_value.as_slice()));
}

/// S2: the built-in version comparator orders numerically, and tilde
/// sorts before the empty suffix.
#[test]
fn s2_version_compare_matches_scenario_expectations() {
    use cfengine_core::actuation::version_compare::compare_versions;

    assert_eq!(compare_versions("1.2.3", "1.2.10"), Ordering::Less);
    assert_eq!(compare_versions("1.2-3", "1.2-3~rc1"), Ordering::Greater);
}

/// S3: `!(linux.x86_64|darwin)&any` evaluates to `False` given the stated
/// name bindings.
#[test]
fn s3_class_expression_parses_and_evaluates() {
    let expr = class_expr::parse("!(linux.x86_64|darwin)&any").unwrap();

    let mut name_eval = |name: &str| -> Tristate {
        match name {
            "linux" | "x86_64" | "any" => Tristate::True,
            "darwin" => Tristate::False,
            _ => Tristate::Error,
        }
    };
    let mut varref_eval = |_name: &str, _kind: RefKind| -> Result<String, cfengine_core::expr::Error> {
        panic!("no variable references expected in this expression")
    };

    let result = expr.eval(&mut name_eval, &mut varref_eval);
    assert_eq!(result, Tristate::False);
}

/// S4: a fully-qualified, indexed variable reference round-trips exactly
/// through parse then render.
#[test]
fn s4_variable_reference_round_trips_through_parse_and_render() {
    let input = "ns:scope.lval[$(other[x])]";
    let parsed = varref::parse(input).unwrap();

    assert_eq!(parsed.namespace.as_deref(), Some("ns"));
    assert_eq!(parsed.scope.as_deref(), Some("scope"));
    assert_eq!(parsed.lval, "lval");
    assert_eq!(parsed.indices, vec!["$(other[x])".to_string()]);
    assert_eq!(parsed.to_string_qualified(), input);
}

struct FakeConnection {
    alive: std::sync::atomic::AtomicBool,
}

impl ConnectionHandle for FakeConnection {
    fn probe_alive(&self) -> bool {
        self.alive.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// S5: dialing the same `(host, port, flags)` tuple twice reuses the same
/// pool entry; once that entry is marked broken, a third dial never
/// returns it again.
#[test]
fn s5_connection_cache_reuses_idle_entries_and_retires_broken_ones() {
    let pool: Pool<FakeConnection> = Pool::new();
    let flags = ConnectionFlags::empty();

    let first = pool.insert_busy("h", 5308, flags, FakeConnection { alive: std::sync::atomic::AtomicBool::new(true) });
    pool.mark_not_busy(first).unwrap();

    let second = pool.find_idle_mark_busy("h", 5308, flags);
    assert_eq!(second, Some(first));
    pool.mark_broken(second.unwrap()).unwrap();

    let third = pool.find_idle_mark_busy("h", 5308, flags);
    assert_ne!(third, Some(first));
    assert!(third.is_none());
}
