pub mod api_router;
pub mod audit;
pub mod contacts;
pub mod core;
pub mod directory;
pub mod shared;
pub mod storage;
