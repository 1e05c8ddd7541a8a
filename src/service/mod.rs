pub mod conversation_store;
pub mod state;

pub use self::conversation_store::{
    ConversationStore, ReloadTicket, SendOutcome, StoreUpdates, MAX_MESSAGE_LENGTH,
};
pub use self::state::ChatSnapshot;
