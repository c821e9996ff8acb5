pub mod energy_record_queries;
pub mod page;

pub use page::{Page, PageToken, RecordQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
