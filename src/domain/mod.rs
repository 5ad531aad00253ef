pub mod feed;
pub mod follow;
pub mod post;
pub mod user;

pub use feed::Feed;
pub use follow::{FeedFollow, FeedFollowView};
pub use post::{Post, PostDraft, PostView};
pub use user::User;
