pub mod capture;
pub mod matcher;
pub mod ocr;
pub mod template;
pub mod types;
