//! Wire protocol for the ToDus out-of-band upload negotiation.
//!
//! The negotiation server speaks a compact XMPP-like dialect: a persistent
//! stream of XML stanzas with single-letter namespaces. This crate holds the
//! shared wire model consumed by both the negotiation engine and the
//! transfer engine: the incremental stanza decoder, the closed set of
//! decoded wire events, the outbound stanza builders, and the grant type
//! a successful negotiation produces.

pub mod constants;
pub mod decoder;
pub mod element;
pub mod events;
pub mod percent;
pub mod types;
pub mod writer;

pub use decoder::StanzaDecoder;
pub use element::Element;
pub use events::{UploadSlot, WireEvent};
pub use types::UploadGrant;
