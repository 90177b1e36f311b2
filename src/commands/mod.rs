mod bootstrap;
mod status;

pub use bootstrap::run as bootstrap;
pub use status::run as status;
