pub mod page_processor;
pub mod reading_order;

pub use page_processor::PageProcessor;
pub use reading_order::{ReadingOrderSorter, SortOptions};
