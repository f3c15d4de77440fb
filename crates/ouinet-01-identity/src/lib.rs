//! Node identifiers, contacts, and the bencoded wire format shared by every
//! other Ouinet DHT crate.

pub mod bencode;
pub mod contact;
pub mod node_id;

pub use bencode::{BencodeError, DictBuilder, Value};
pub use contact::{compare_by_distance, Contact};
pub use node_id::{closer_to, xor_distance, Distance, NodeId, Range, ID_LEN};
