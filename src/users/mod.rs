mod repo;

pub use repo::{PgUserStore, PublicUser, User, UserStore};
