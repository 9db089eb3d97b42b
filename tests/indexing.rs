//! DN-keyed mode: index record maintenance and lookup.

use faro::schema::{ATTR_INDEXED, ATTR_UNIQUE_INDEX};
use faro::{
    Config, Dn, Engine, Element, FilterTree, KvStore, MemoryKv, Message, Schema, Scope,
    SearchOutcome, SearchRequest, Syntax,
};

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema.register("cn", Syntax::CaseIgnoreString, ATTR_INDEXED);
    schema.register("mail", Syntax::CaseIgnoreString, 0);
    schema.register("serial", Syntax::CaseIgnoreString, ATTR_INDEXED | ATTR_UNIQUE_INDEX);
    schema
}

/// DN mode, indexed attributes taken from a stored @INDEXLIST record.
fn engine() -> Engine<MemoryKv> {
    let mut engine = Engine::open(MemoryKv::new(), schema(), Config::dn_indexed()).unwrap();
    let mut indexlist = Message::new(Dn::parse("@INDEXLIST").unwrap());
    indexlist.add("@IDXATTR", b"cn");
    indexlist.add("@IDXATTR", b"serial");
    indexlist.add("@IDXONE", b"1");
    engine.add(&indexlist).unwrap();
    engine
}

fn entry(dn: &str, attrs: &[(&str, &str)]) -> Message {
    let mut msg = Message::new(Dn::parse(dn).unwrap());
    for (name, value) in attrs {
        msg.add(name, value.as_bytes());
    }
    msg
}

fn index_record(engine: &Engine<MemoryKv>, name: &str) -> Option<Message> {
    let mut key = b"DN=".to_vec();
    key.extend_from_slice(name.as_bytes());
    engine
        .store()
        .get(&key)
        .unwrap()
        .map(|data| Message::unpack(&data).unwrap())
}

fn run_search(
    engine: &Engine<MemoryKv>,
    base: &str,
    scope: Scope,
    tree: FilterTree,
) -> (SearchOutcome, Vec<Message>) {
    let req = SearchRequest {
        base: Dn::parse(base).unwrap(),
        scope,
        tree,
        attrs: None,
    };
    let mut hits = Vec::new();
    let outcome = engine.search(&req, &mut |msg| {
        hits.push(msg);
        Ok(())
    });
    (outcome.unwrap(), hits)
}

#[test]
fn add_creates_a_version2_index_record() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();

    let rec = index_record(&e, "@INDEX:cn:a").expect("index record missing");
    assert_eq!(rec.find_attr_as_u32("@IDXVERSION", 0), 2);
    let idx = rec.find_element("@IDX").unwrap();
    assert_eq!(idx.values, vec![b"CN=A,DC=X".to_vec()]);
}

#[test]
fn values_are_canonicalised_into_the_key() {
    let mut e = engine();
    e.add(&entry("CN=b,DC=x", &[("cn", "  MixedCase ")])).unwrap();
    assert!(index_record(&e, "@INDEX:cn:mixedcase").is_some());
}

#[test]
fn subtree_search_finds_the_entry() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();

    let (outcome, hits) = run_search(&e, "DC=x", Scope::Subtree, FilterTree::equality("cn", b"a"));
    assert_eq!(outcome, SearchOutcome::Matched(1));
    assert_eq!(hits[0].dn, Dn::parse("CN=a,DC=x").unwrap());
}

#[test]
fn base_search_is_answered_from_the_key() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    let (outcome, hits) = run_search(
        &e,
        "cn=A,dc=X",
        Scope::Base,
        FilterTree::present("cn"),
    );
    assert_eq!(outcome, SearchOutcome::Matched(1));
    assert_eq!(hits.len(), 1);
}

#[test]
fn delete_drops_the_index_record() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    e.delete(&Dn::parse("CN=a,DC=x").unwrap()).unwrap();

    assert!(index_record(&e, "@INDEX:cn:a").is_none());
    let (outcome, _) = run_search(&e, "DC=x", Scope::Subtree, FilterTree::equality("cn", b"a"));
    assert_eq!(outcome, SearchOutcome::Matched(0));
}

#[test]
fn shared_values_accumulate_in_one_record() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "group")])).unwrap();
    e.add(&entry("CN=b,DC=x", &[("cn", "group")])).unwrap();

    let rec = index_record(&e, "@INDEX:cn:group").unwrap();
    assert_eq!(rec.find_element("@IDX").unwrap().values.len(), 2);

    e.delete(&Dn::parse("CN=a,DC=x").unwrap()).unwrap();
    let rec = index_record(&e, "@INDEX:cn:group").unwrap();
    assert_eq!(
        rec.find_element("@IDX").unwrap().values,
        vec![b"CN=B,DC=X".to_vec()]
    );
}

#[test]
fn unindexed_attributes_leave_no_records() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("mail", "a@x")])).unwrap();
    assert!(index_record(&e, "@INDEX:mail:a@x").is_none());
}

#[test]
fn control_records_are_never_indexed() {
    let mut e = engine();
    let mut special = Message::new(Dn::parse("@BASEINFO").unwrap());
    special.add("cn", b"ignored");
    e.add(&special).unwrap();
    assert!(index_record(&e, "@INDEX:cn:ignored").is_none());
}

#[test]
fn adding_the_same_dn_twice_is_a_constraint_violation() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    let err = e.add(&entry("cn=A,dc=X", &[("cn", "other")])).unwrap_err();
    assert!(matches!(err, faro::FaroError::ConstraintViolation(_)));
}

#[test]
fn one_level_family_tracks_children_exactly() {
    let mut e = engine();
    e.add(&entry("DC=x", &[])).unwrap();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    e.add(&entry("CN=b,DC=x", &[("cn", "b")])).unwrap();
    e.add(&entry("CN=c,CN=a,DC=x", &[("cn", "c")])).unwrap();

    let rec = index_record(&e, "@INDEX:@IDXONE:DC=X").unwrap();
    let mut children = rec.find_element("@IDX").unwrap().values.clone();
    children.sort();
    assert_eq!(children, vec![b"CN=A,DC=X".to_vec(), b"CN=B,DC=X".to_vec()]);

    let rec = index_record(&e, "@INDEX:@IDXONE:CN=A,DC=X").unwrap();
    assert_eq!(
        rec.find_element("@IDX").unwrap().values,
        vec![b"CN=C,CN=A,DC=X".to_vec()]
    );

    e.delete(&Dn::parse("CN=b,DC=x").unwrap()).unwrap();
    let rec = index_record(&e, "@INDEX:@IDXONE:DC=X").unwrap();
    assert_eq!(
        rec.find_element("@IDX").unwrap().values,
        vec![b"CN=A,DC=X".to_vec()]
    );
}

#[test]
fn one_level_search_uses_the_family() {
    let mut e = engine();
    e.add(&entry("DC=x", &[])).unwrap();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    e.add(&entry("CN=c,CN=a,DC=x", &[("cn", "a")])).unwrap();

    // the grandchild shares the cn value but is out of scope
    let (outcome, hits) = run_search(&e, "DC=x", Scope::OneLevel, FilterTree::equality("cn", b"a"));
    assert_eq!(outcome, SearchOutcome::Matched(1));
    assert_eq!(hits[0].dn, Dn::parse("CN=a,DC=x").unwrap());
}

#[test]
fn element_level_add_and_remove() {
    let mut e = engine();
    let mut msg = entry("CN=a,DC=x", &[("cn", "a")]);
    e.add(&msg).unwrap();

    let extra = Element::new("cn", vec![b"alias".to_vec()]);
    e.index_add_element(&msg, &extra).unwrap();
    msg.add("cn", b"alias");
    assert!(index_record(&e, "@INDEX:cn:alias").is_some());

    let (outcome, _) = run_search(&e, "DC=x", Scope::Subtree, FilterTree::equality("cn", b"alias"));
    // the stored record was not rewritten, so the re-filter rejects it
    assert_eq!(outcome, SearchOutcome::Matched(0));

    e.index_del_element(&msg, &extra).unwrap();
    assert!(index_record(&e, "@INDEX:cn:alias").is_none());
}

#[test]
fn del_value_for_unindexed_record_is_a_noop() {
    let mut e = engine();
    let msg = entry("CN=a,DC=x", &[("cn", "a")]);
    let el = Element::new("cn", vec![b"never-indexed".to_vec()]);
    e.index_del_value(&msg, &el, 0).unwrap();
}

#[test]
fn stale_index_entries_are_skipped_by_search() {
    let mut e = engine();
    e.add(&entry("CN=a,DC=x", &[("cn", "a")])).unwrap();
    // simulate a record vanishing underneath its index entry
    let mut store = e.into_store();
    store.delete(b"DN=CN=A,DC=X").unwrap();
    let e = reopen(store);

    let (outcome, _) = run_search(&e, "DC=x", Scope::Subtree, FilterTree::equality("cn", b"a"));
    assert_eq!(outcome, SearchOutcome::Matched(0));
}

fn reopen(store: MemoryKv) -> Engine<MemoryKv> {
    Engine::open(store, schema(), Config::dn_indexed()).unwrap()
}
