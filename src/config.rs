//! Engine configuration, fixed for the lifetime of a database handle.

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Attribute whose 16-byte value is the entry id. `None` selects
    /// DN-keyed mode.
    pub guid_attr: Option<String>,
    /// Extended DN component carrying the GUID, enabling base lookups
    /// without an index fetch.
    pub guid_dn_component: Option<String>,
    /// Maintain the parent-to-children index.
    pub one_level_indexes: bool,
    /// Hard cap on storage key length; 0 means unlimited.
    pub max_key_length: usize,
    /// Reject `(dn=...)` equality filters.
    pub disallow_dn_filter: bool,
    /// Take indexed attributes from schema flags instead of the stored
    /// `@INDEXLIST` record.
    pub override_indexlist: bool,
    pub read_only: bool,
}

impl Config {
    /// DN-keyed mode with the stored index list; matches a database
    /// created without any special controls.
    pub fn dn_indexed() -> Self {
        Self::default()
    }

    /// GUID-keyed mode with schema-driven index flags, the layout a
    /// directory server would run with.
    pub fn guid_indexed(guid_attr: &str) -> Self {
        Config {
            guid_attr: Some(guid_attr.to_string()),
            guid_dn_component: Some("GUID".to_string()),
            one_level_indexes: true,
            override_indexlist: true,
            ..Self::default()
        }
    }
}
