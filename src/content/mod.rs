pub mod comments;
pub mod mentions;
pub mod notifications;
pub mod posts;
pub mod slug;
pub mod votes;
