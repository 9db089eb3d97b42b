//! Transaction overlay: write collapsing, commit visibility, abort.

use faro::schema::ATTR_INDEXED;
use faro::{
    Config, Dn, Engine, FilterTree, KvStore, KvVisitor, MemoryKv, Message, PutMode, Result,
    Schema, Scope, SearchOutcome, SearchRequest, Syntax,
};

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema.register("objectGUID", Syntax::Guid, 0);
    schema.register("cn", Syntax::CaseIgnoreString, ATTR_INDEXED);
    schema
}

fn engine() -> Engine<CountingKv> {
    let store = CountingKv::default();
    Engine::open(store, schema(), Config::guid_indexed("objectGUID")).unwrap()
}

fn entry(dn: &str, n: u8, cn: &str) -> Message {
    let mut msg = Message::new(Dn::parse(dn).unwrap());
    let mut guid = vec![0u8; 16];
    guid[15] = n;
    msg.add("objectGUID", &guid);
    msg.add("cn", cn.as_bytes());
    msg
}

fn count_matches(engine: &Engine<CountingKv>, cn: &str) -> u32 {
    let req = SearchRequest {
        base: Dn::parse("DC=x").unwrap(),
        scope: Scope::Subtree,
        tree: FilterTree::equality("cn", cn.as_bytes()),
        attrs: None,
    };
    match engine.search(&req, &mut |_| Ok(())).unwrap() {
        SearchOutcome::Matched(n) => n,
        SearchOutcome::FallbackFull => panic!("unexpected fallback"),
    }
}

/// Store wrapper that records every put key, for write-amplification
/// assertions.
#[derive(Default)]
struct CountingKv {
    inner: MemoryKv,
    puts: Vec<Vec<u8>>,
}

impl KvStore for CountingKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> Result<()> {
        self.puts.push(key.to_vec());
        self.inner.put(key, value, mode)
    }
    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }
    fn iterate(&self, visitor: &mut dyn KvVisitor) -> Result<()> {
        self.inner.iterate(visitor)
    }
    fn update_in_iterate(&mut self, old: &[u8], new: &[u8], value: &[u8]) -> Result<()> {
        self.inner.update_in_iterate(old, new, value)
    }
    fn tx_begin(&mut self) -> Result<()> {
        self.inner.tx_begin()
    }
    fn tx_commit(&mut self) -> Result<()> {
        self.inner.tx_commit()
    }
    fn tx_cancel(&mut self) -> Result<()> {
        self.inner.tx_cancel()
    }
}

#[test]
fn repeated_index_updates_collapse_into_one_write() {
    let mut e = engine();
    e.tx_begin().unwrap();
    e.add(&entry("CN=a,DC=x", 1, "group")).unwrap();
    e.add(&entry("CN=b,DC=x", 2, "group")).unwrap();
    e.add(&entry("CN=c,DC=x", 3, "group")).unwrap();
    e.tx_commit().unwrap();

    let index_writes = e
        .store()
        .puts
        .iter()
        .filter(|key| key.as_slice() == b"DN=@INDEX:cn:group")
        .count();
    assert_eq!(index_writes, 1);
    assert_eq!(count_matches(&e, "group"), 3);
}

#[test]
fn staged_writes_are_invisible_after_cancel() {
    let mut e = engine();
    e.add(&entry("CN=keep,DC=x", 1, "keep")).unwrap();
    let before = e.store().inner.snapshot();

    e.tx_begin().unwrap();
    e.add(&entry("CN=a,DC=x", 2, "gone")).unwrap();
    e.delete(&Dn::parse("CN=keep,DC=x").unwrap()).unwrap();
    e.tx_cancel();

    assert_eq!(e.store().inner.snapshot(), before);
    assert_eq!(count_matches(&e, "keep"), 1);
    assert_eq!(count_matches(&e, "gone"), 0);
}

#[test]
fn add_modify_delete_in_one_transaction_leaves_no_traces() {
    let mut e = engine();
    let before = e.store().inner.snapshot();

    e.tx_begin().unwrap();
    let msg = entry("CN=a,DC=x", 1, "transient");
    e.add(&msg).unwrap();
    let alias = faro::Element::new("cn", vec![b"alias".to_vec()]);
    e.index_add_element(&msg, &alias).unwrap();
    e.index_del_element(&msg, &alias).unwrap();
    e.delete(&Dn::parse("CN=a,DC=x").unwrap()).unwrap();
    e.tx_commit().unwrap();

    assert_eq!(e.store().inner.snapshot(), before);
}

#[test]
fn reads_inside_a_transaction_see_staged_index_state() {
    let mut e = engine();
    e.tx_begin().unwrap();
    e.add(&entry("CN=a,DC=x", 1, "staged")).unwrap();
    // the index record only exists in the overlay at this point
    assert!(e.store().get(b"DN=@INDEX:cn:staged").unwrap().is_none());
    assert_eq!(count_matches(&e, "staged"), 1);
    e.tx_commit().unwrap();
    assert!(e.store().get(b"DN=@INDEX:cn:staged").unwrap().is_some());
}

#[test]
fn commit_without_a_transaction_fails() {
    let mut e = engine();
    assert!(e.tx_commit().is_err());
}

#[test]
fn nested_transactions_are_rejected() {
    let mut e = engine();
    e.tx_begin().unwrap();
    assert!(e.tx_begin().is_err());
    e.tx_cancel();
}
