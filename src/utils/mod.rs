pub mod image_ops;
pub mod natural_sort;

// Re-export commonly used items
pub use image_ops::{crop_region, decode_image, encode_png};
pub use natural_sort::natural_cmp;
