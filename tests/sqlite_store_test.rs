//! End-to-end tests against real embedded database files.

use chrono::NaiveDate;
use std::sync::Arc;
use tablekit::db::Dialect;
use tablekit::models::{FieldSpec, Null, PRIMARY, SqlEnum, TableDescriptor, TypeMapperRegistry};
use tablekit::{BackendConfig, ConfigStore, Database, DbError};
use tempfile::TempDir;

fn open(dir: &TempDir, mappers: Arc<TypeMapperRegistry>) -> Database<tablekit::db::AnyDriver> {
    let config = BackendConfig::resolve(dir.path()).unwrap();
    Database::open(&config, mappers).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: i32,
    name: String,
    value: String,
}

fn entries(mappers: &Arc<TypeMapperRegistry>) -> TableDescriptor<Entry> {
    TableDescriptor::builder("entries")
        .field::<i32>("id", FieldSpec::key(PRIMARY))
        .field::<String>("name", FieldSpec::key(PRIMARY))
        .field::<String>("value", FieldSpec::data())
        .build(mappers, |v| {
            Ok(Entry {
                id: v.next()?,
                name: v.next()?,
                value: v.next()?,
            })
        })
        .unwrap()
}

#[test]
fn test_upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    assert_eq!(db.dialect(), Dialect::SQLite);
    let table = db.table(entries(db.mappers())).unwrap();

    let insert = table.insert_all();
    insert
        .update(&[&1i32, &"a".to_string(), &"x".to_string()])
        .unwrap();
    insert
        .update(&[&1i32, &"a".to_string(), &"y".to_string()])
        .unwrap();

    let rows = table.select_fields(&["id"]).unwrap().select_all(&[&1i32]).unwrap();
    assert_eq!(
        rows,
        vec![Entry {
            id: 1,
            name: "a".into(),
            value: "y".into()
        }]
    );
}

#[test]
fn test_key_only_insert_is_not_an_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let table = db.table(entries(db.mappers())).unwrap();

    let insert = table.insert_all();
    insert
        .update(&[&7i32, &"k".to_string(), &"v".to_string()])
        .unwrap();
    let err = table
        .insert(PRIMARY)
        .unwrap()
        .update(&[&7i32, &"k".to_string()])
        .unwrap_err();
    assert!(matches!(err, DbError::Statement { .. }));
    assert!(!table.insert(PRIMARY).unwrap().sql().contains("ON CONFLICT"));
}

#[test]
fn test_config_store_delete_then_get_default() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let store = ConfigStore::new(&db).unwrap();

    store.set("g1", "lang", Some("de")).unwrap();
    assert_eq!(store.get("g1", "lang").unwrap().as_deref(), Some("de"));

    store.delete("g1", "lang").unwrap();
    assert_eq!(store.get_or("g1", "lang", "en").unwrap(), "en");

    // Deleting again is not an error.
    store.delete("g1", "lang").unwrap();
}

#[test]
fn test_config_store_set_none_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let store = ConfigStore::new(&db).unwrap();

    store.set("g1", "volume", Some("80")).unwrap();
    store.set("g1", "volume", Some("55")).unwrap();
    assert_eq!(store.get_parsed_or("g1", "volume", 100u8).unwrap(), 55);

    store.set("g1", "volume", None).unwrap();
    assert_eq!(store.get("g1", "volume").unwrap(), None);
    assert_eq!(store.get_parsed_or("g1", "volume", 100u8).unwrap(), 100);

    store.set("g1", "volume", Some("loud")).unwrap();
    assert_eq!(store.get_parsed_or("g1", "volume", 100u8).unwrap(), 100);
}

#[test]
fn test_config_store_list_and_persistence() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(&dir, TypeMapperRegistry::standard());
        let store = ConfigStore::new(&db).unwrap();
        store.set("g1", "b", Some("2")).unwrap();
        store.set("g1", "a", Some("1")).unwrap();
        store.set("g2", "a", Some("other")).unwrap();
        drop(store);
        db.shutdown();
    }

    let db = open(&dir, TypeMapperRegistry::standard());
    let store = ConfigStore::new(&db).unwrap();
    let names: Vec<_> = store
        .list("g1")
        .unwrap()
        .into_iter()
        .map(|s| (s.name, s.value))
        .collect();
    assert_eq!(
        names,
        vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
    );
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Guest,
    Member,
    Moderator,
}

impl SqlEnum for Role {
    const VARIANTS: &'static [Self] = &[Role::Guest, Role::Member, Role::Moderator];

    fn name(self) -> &'static str {
        match self {
            Role::Guest => "Guest",
            Role::Member => "Member",
            Role::Moderator => "Moderator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Channel {
    Text,
    Voice,
}

impl SqlEnum for Channel {
    const VARIANTS: &'static [Self] = &[Channel::Text, Channel::Voice];

    fn name(self) -> &'static str {
        match self {
            Channel::Text => "TEXT",
            Channel::Voice => "VOICE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sample {
    id: i64,
    flag: bool,
    tiny: i8,
    small: i16,
    ratio: f64,
    label: String,
    payload: Vec<u8>,
    seen: chrono::NaiveDateTime,
    missing: Option<i32>,
    note: Option<String>,
    role: Role,
    channel: Channel,
}

#[test]
fn test_values_round_trip_through_mappers() {
    let dir = tempfile::tempdir().unwrap();
    let mappers = Arc::new(
        TypeMapperRegistry::builder()
            .ordinal_enum::<Role>()
            .name_enum::<Channel>()
            .build(),
    );
    let db = open(&dir, Arc::clone(&mappers));
    let descriptor = TableDescriptor::builder("samples")
        .field::<i64>("id", FieldSpec::key(PRIMARY))
        .field::<bool>("flag", FieldSpec::data())
        .field::<i8>("tiny", FieldSpec::data())
        .field::<i16>("small", FieldSpec::data())
        .field::<f64>("ratio", FieldSpec::data())
        .field::<String>("label", FieldSpec::data())
        .field::<Vec<u8>>("payload", FieldSpec::data())
        .field::<chrono::NaiveDateTime>("seen", FieldSpec::data())
        .field::<Option<i32>>("missing", FieldSpec::data())
        .field::<Option<String>>("note", FieldSpec::data())
        .field::<Role>("role", FieldSpec::data())
        .field::<Channel>("channel", FieldSpec::data())
        .build(&mappers, |v| {
            Ok(Sample {
                id: v.next()?,
                flag: v.next()?,
                tiny: v.next()?,
                small: v.next()?,
                ratio: v.next()?,
                label: v.next()?,
                payload: v.next()?,
                seen: v.next()?,
                missing: v.next()?,
                note: v.next()?,
                role: v.next()?,
                channel: v.next()?,
            })
        })
        .unwrap();
    let table = db.table(descriptor).unwrap();

    let seen = NaiveDate::from_ymd_opt(2024, 2, 29)
        .unwrap()
        .and_hms_milli_opt(23, 59, 58, 125)
        .unwrap();
    let expected = Sample {
        id: 9_000_000_000,
        flag: true,
        tiny: -8,
        small: 1234,
        ratio: 0.25,
        label: "héllo".into(),
        payload: vec![0, 1, 2, 255],
        seen,
        missing: None,
        note: Some("n".into()),
        role: Role::Moderator,
        channel: Channel::Voice,
    };

    table
        .insert_all()
        .update(&[
            &expected.id,
            &expected.flag,
            &expected.tiny,
            &expected.small,
            &expected.ratio,
            &expected.label,
            &expected.payload,
            &expected.seen,
            &expected.missing,
            &expected.note,
            &expected.role,
            &expected.channel,
        ])
        .unwrap();

    let read = table
        .select_by(PRIMARY)
        .unwrap()
        .select_one(&[&expected.id])
        .unwrap();
    assert_eq!(read, Some(expected));
}

#[derive(Debug, PartialEq)]
struct Member {
    nick: Option<String>,
    score: i32,
}

fn members(mappers: &Arc<TypeMapperRegistry>) -> TableDescriptor<Member> {
    TableDescriptor::builder("members")
        .field::<Option<String>>("nick", FieldSpec::key("nick"))
        .field::<i32>("score", FieldSpec::data().default_literal("0"))
        .build(mappers, |v| {
            Ok(Member {
                nick: v.next()?,
                score: v.next()?,
            })
        })
        .unwrap()
}

#[test]
fn test_null_safe_selection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let table = db.table(members(db.mappers())).unwrap();

    table
        .insert_fields(false, &["nick", "score"])
        .unwrap()
        .update(&[&Null, &3i32])
        .unwrap();

    let plain = table.select_by("nick").unwrap();
    assert_eq!(plain.select_one(&[&Null]).unwrap(), None);

    let null_safe = table.select_by_null_safe("nick").unwrap();
    assert_eq!(
        null_safe.select_one(&[&None::<String>]).unwrap(),
        Some(Member {
            nick: None,
            score: 3
        })
    );
}

#[test]
fn test_generated_key_and_column_default() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let table = db.table(members(db.mappers())).unwrap();

    let insert = table.insert_fields(true, &["nick"]).unwrap();
    let first = insert.insert_get_key(&[&Some("ada".to_string())]).unwrap();
    let second = insert.insert_get_key(&[&Some("bob".to_string())]).unwrap();
    assert_eq!(second, first + 1);

    let bob = table
        .select_by("nick")
        .unwrap()
        .select_one(&[&Some("bob".to_string())])
        .unwrap();
    assert_eq!(
        bob,
        Some(Member {
            nick: Some("bob".into()),
            score: 0
        })
    );

    table
        .update_field("score", &["nick"])
        .unwrap()
        .update(&[&10i32, &Some("bob".to_string())])
        .unwrap();
    table
        .delete_fields(&["nick"])
        .unwrap()
        .update(&[&Some("ada".to_string())])
        .unwrap();

    let all = table
        .select_fields(&["score"])
        .unwrap()
        .select_all(&[&10i32])
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].nick.as_deref(), Some("bob"));
}

#[test]
fn test_registration_is_idempotent_and_bad_sql_is_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    db.table(entries(db.mappers())).unwrap();
    db.table(entries(db.mappers())).unwrap();

    let err = db
        .statement("SELECT nothing FROM missing_table", false)
        .query(&[])
        .unwrap_err();
    assert!(matches!(err, DbError::Statement { .. }));
    assert!(matches!(err.root_cause(), DbError::Database { .. }));
}

#[test]
fn test_shutdown_rejects_further_use() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, TypeMapperRegistry::standard());
    let store = ConfigStore::new(&db).unwrap();
    store.set("g", "k", Some("v")).unwrap();

    db.shutdown();
    assert!(matches!(store.get("g", "k"), Err(DbError::PoolClosed)));
}
