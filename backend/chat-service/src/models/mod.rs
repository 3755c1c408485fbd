pub mod conversation;
pub mod message;

pub use conversation::Conversation;
pub use message::{Attachment, Message, MessageType, NewMessage, PageInfo, PageRequest, Paginated};
