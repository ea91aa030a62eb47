//! Benchmarks for message and control encoding.

#![allow(missing_docs, clippy::unwrap_used)]

use std::hint::black_box;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use ldap_protocol::message::{PartialAttribute, SearchResultEntry};
use ldap_protocol::{
    Control, ControlRegistry, Filter, LdapMessage, PagedResultsControl, ProtocolOp,
};

fn bench_filter_parse(c: &mut Criterion) {
    c.bench_function("filter_parse", |b| {
        b.iter(|| {
            Filter::parse(black_box(
                "(&(objectClass=inetOrgPerson)(|(uid=jdoe*)(mail=*@example.com))(!(cn=test)))",
            ))
        });
    });
}

fn bench_entry_decode(c: &mut Criterion) {
    let message = LdapMessage::new(
        42,
        ProtocolOp::SearchResultEntry(SearchResultEntry {
            dn: "uid=jdoe,ou=people,dc=example,dc=com".into(),
            attributes: vec![
                PartialAttribute::new("cn", ["John Doe"]),
                PartialAttribute::new("mail", ["jdoe@example.com"]),
                PartialAttribute::new("objectClass", ["top", "person", "inetOrgPerson"]),
            ],
        }),
    );
    let bytes = message.encode();
    c.bench_function("entry_decode", |b| {
        b.iter(|| LdapMessage::decode(black_box(&bytes)).unwrap());
    });
}

fn bench_control_encode(c: &mut Criterion) {
    let registry = ControlRegistry::with_defaults();
    let controls: Vec<Arc<dyn Control>> = vec![Arc::new(
        PagedResultsControl::new(500).with_cookie(Bytes::from_static(&[0xA7; 8])),
    )];
    c.bench_function("control_encode_all", |b| {
        b.iter(|| registry.encode_all(black_box(&controls)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_filter_parse,
    bench_entry_decode,
    bench_control_encode
);
criterion_main!(benches);
