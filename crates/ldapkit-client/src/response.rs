//! Operation results.

use std::sync::Arc;

use bytes::Bytes;
use ldap_protocol::message::SearchResultEntry;
use ldap_protocol::{Control, LdapResult, control};

/// Outcome of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Returned entries, in arrival order.
    pub entries: Vec<SearchResultEntry>,
    /// Continuation references, flattened.
    pub references: Vec<String>,
    /// The SearchResultDone result.
    pub result: LdapResult,
    /// Decoded SearchResultDone controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl SearchResult {
    /// An empty, successful result.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            references: Vec::new(),
            result: LdapResult::success(),
            controls: Vec::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were returned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry, if any.
    pub fn first(&self) -> Option<&SearchResultEntry> {
        self.entries.first()
    }

    /// Entry with the given DN, compared case-insensitively.
    pub fn entry(&self, dn: &str) -> Option<&SearchResultEntry> {
        self.entries.iter().find(|e| e.dn.eq_ignore_ascii_case(dn))
    }

    /// First response control of type `T`.
    pub fn control<T: Control>(&self) -> Option<&T> {
        control::find(&self.controls)
    }

    /// Append another page of results.
    ///
    /// Entries and references accumulate. The result and controls are
    /// replaced by those of `other`.
    pub fn merge(&mut self, other: SearchResult) {
        self.entries.extend(other.entries);
        self.references.extend(other.references);
        self.result = other.result;
        self.controls = other.controls;
    }
}

/// One message of a streamed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    /// An entry.
    Entry(SearchResultEntry),
    /// A continuation reference.
    Reference(Vec<String>),
    /// The final result. No more items follow.
    Done(LdapResult, Vec<Arc<dyn Control>>),
}

/// Outcome of an add, modify, delete or bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// Result.
    pub result: LdapResult,
    /// Decoded response controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl OperationResult {
    /// First response control of type `T`.
    pub fn control<T: Control>(&self) -> Option<&T> {
        control::find(&self.controls)
    }
}

/// Outcome of a compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareResult {
    /// Whether the assertion matched.
    pub matched: bool,
    /// Decoded response controls.
    pub controls: Vec<Arc<dyn Control>>,
}

/// Outcome of an extended operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResult {
    /// Result.
    pub result: LdapResult,
    /// Response OID.
    pub name: Option<String>,
    /// Response value.
    pub value: Option<Bytes>,
    /// Decoded response controls.
    pub controls: Vec<Arc<dyn Control>>,
}

/// Response to a [`Request`](crate::Request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Search results.
    Search(SearchResult),
    /// Compare outcome.
    Compare(CompareResult),
    /// Add, modify, delete or bind outcome.
    Operation(OperationResult),
    /// Extended operation outcome.
    Extended(ExtendedResult),
}

impl Response {
    /// Response controls, whatever the operation.
    pub fn controls(&self) -> &[Arc<dyn Control>] {
        match self {
            Self::Search(r) => &r.controls,
            Self::Compare(r) => &r.controls,
            Self::Operation(r) => &r.controls,
            Self::Extended(r) => &r.controls,
        }
    }

    /// The search result, if this is one.
    pub fn into_search(self) -> Option<SearchResult> {
        match self {
            Self::Search(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap_protocol::PagedResultsControl;
    use ldap_protocol::message::PartialAttribute;

    fn entry(dn: &str) -> SearchResultEntry {
        SearchResultEntry {
            dn: dn.into(),
            attributes: vec![PartialAttribute::new("cn", ["x"])],
        }
    }

    #[test]
    fn test_merge_pages() {
        let mut first = SearchResult {
            entries: vec![entry("cn=a,dc=example,dc=com")],
            references: vec!["ldap://other/".into()],
            result: LdapResult::success(),
            controls: vec![Arc::new(PagedResultsControl::new(0).with_cookie(&b"c1"[..]))],
        };
        let second = SearchResult {
            entries: vec![entry("cn=b,dc=example,dc=com")],
            references: Vec::new(),
            result: LdapResult::success(),
            controls: vec![Arc::new(PagedResultsControl::new(0))],
        };
        first.merge(second);

        assert_eq!(first.len(), 2);
        assert_eq!(first.references.len(), 1);
        assert!(first.entry("CN=B,DC=EXAMPLE,DC=COM").is_some());
        assert!(
            !first
                .control::<PagedResultsControl>()
                .is_some_and(PagedResultsControl::has_more)
        );
    }

    #[test]
    fn test_response_controls() {
        let response = Response::Compare(CompareResult {
            matched: true,
            controls: Vec::new(),
        });
        assert!(response.controls().is_empty());
        assert!(response.into_search().is_none());
    }
}
