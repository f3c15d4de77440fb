pub mod active_request;
pub mod bep44;
pub mod collector;
pub mod compact;
pub mod errors;
pub mod message;
pub mod transaction_id;

pub use active_request::{ActiveRequest, ActiveRequestTable};
pub use bep44::{immutable_key, mutable_key, signing_payload, ImmutableItem, MutableItem};
pub use collector::{collect, EvalOutcome, THREADS};
pub use compact::{
    decode_endpoint, decode_endpoint_v4, decode_endpoint_v6, decode_nodes_v4, decode_nodes_v6,
    encode_endpoint, encode_endpoint_v4, encode_endpoint_v6, encode_nodes_v4, encode_nodes_v6,
};
pub use errors::{code, DhtError};
pub use message::Message;
pub use transaction_id::TransactionIdGenerator;
