use bytes::Bytes;

/// One not-yet-delivered outbox record, handed from a source to the sink.
///
/// Created by a fetch, consumed exactly once by a publish attempt. The id is
/// whatever the owning store uses to identify the record (a row id, a stream
/// entry id), stringified; the payload is never inspected or transformed in
/// between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxItem {
    pub id: String,
    pub payload: Bytes,
}

/// The result of exactly one delivery attempt, correlated back to the record
/// by id. Ids may arrive in any order relative to the original fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub id: String,
    pub delivered: bool,
}
