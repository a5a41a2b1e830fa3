//! Protocol types shared by the codec and the connection.
//!
//! - [`Message`]: either a decoded head or a payload item
//! - [`PayloadItem`] and [`PayloadSize`]: body framing
//! - [`RequestHeader`]: the request line and headers, before a body is attached
//! - [`ResponseHead`]: a response without its body
//! - [`HttpError`], [`ParseError`], [`SendError`]: transport errors

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
