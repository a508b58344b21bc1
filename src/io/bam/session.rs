//! Reference dictionary context shared by the record codec and the index builder.

use super::error::{BamDecodeError, BamEncodeError};
use super::header::Header;
use std::collections::HashMap;

/// Name used for "no reference" in textual fields.
pub const NO_REFERENCE: &str = "*";

/// Mate reference shorthand for "same as the record's reference".
pub const SAME_REFERENCE: &str = "=";

/// Resolves reference names to dictionary indices and back.
///
/// Built once from a [`Header`]; every record encoded or decoded against it
/// uses the same `refID` mapping. Name lookup ignores ASCII case.
#[derive(Debug, Clone)]
pub struct Session {
    names: Vec<String>,
    ids: HashMap<String, i32>,
}

impl Session {
    /// Build the lookup tables for `header`'s dictionary.
    ///
    /// If two names differ only in case, the first one wins the lookup.
    pub fn new(header: &Header) -> Self {
        let names: Vec<String> = header.references.iter().map(|r| r.name.clone()).collect();
        let mut ids = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            ids.entry(name.to_ascii_lowercase()).or_insert(id as i32);
        }
        Self { names, ids }
    }

    /// Number of references in the dictionary.
    pub fn reference_count(&self) -> usize {
        self.names.len()
    }

    /// `refID` for a reference name; `None` and `"*"` map to -1.
    pub fn reference_id(&self, name: Option<&str>) -> Result<i32, BamEncodeError> {
        match name {
            None | Some(NO_REFERENCE) => Ok(-1),
            Some(name) => self
                .ids
                .get(&name.to_ascii_lowercase())
                .copied()
                .ok_or_else(|| BamEncodeError::UnknownReference {
                    name: name.to_string(),
                }),
        }
    }

    /// `next_refID` for a mate reference, resolving `"="` to `reference_id`.
    pub fn mate_reference_id(&self, name: Option<&str>, reference_id: i32) -> Result<i32, BamEncodeError> {
        match name {
            Some(SAME_REFERENCE) => Ok(reference_id),
            other => self.reference_id(other),
        }
    }

    /// Reference name for a `refID`; -1 maps to `None`.
    pub fn reference_name(&self, id: i32, field: &'static str) -> Result<Option<&str>, BamDecodeError> {
        if id == -1 {
            return Ok(None);
        }
        usize::try_from(id)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(|name| Some(name.as_str()))
            .ok_or(BamDecodeError::InvalidReferenceId { value: id, field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::header::Reference;

    fn session() -> Session {
        Session::new(&Header::new(
            "",
            vec![Reference::new("chr1", 100), Reference::new("chrX", 50)],
        ))
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let session = session();
        assert_eq!(session.reference_id(Some("chr1")), Ok(0));
        assert_eq!(session.reference_id(Some("CHRX")), Ok(1));
        assert_eq!(session.reference_id(Some("*")), Ok(-1));
        assert_eq!(session.reference_id(None), Ok(-1));
    }

    #[test]
    fn test_unknown_reference() {
        assert_eq!(
            session().reference_id(Some("chr9")),
            Err(BamEncodeError::UnknownReference {
                name: "chr9".to_string()
            })
        );
    }

    #[test]
    fn test_mate_same_reference() {
        let session = session();
        assert_eq!(session.mate_reference_id(Some("="), 1), Ok(1));
        assert_eq!(session.mate_reference_id(Some("chr1"), 1), Ok(0));
        assert_eq!(session.mate_reference_id(None, 1), Ok(-1));
    }

    #[test]
    fn test_reference_name() {
        let session = session();
        assert_eq!(session.reference_name(1, "read").unwrap(), Some("chrX"));
        assert_eq!(session.reference_name(-1, "read").unwrap(), None);
        assert!(matches!(
            session.reference_name(2, "mate"),
            Err(BamDecodeError::InvalidReferenceId { value: 2, field: "mate" })
        ));
        assert!(session.reference_name(-5, "read").is_err());
    }
}
