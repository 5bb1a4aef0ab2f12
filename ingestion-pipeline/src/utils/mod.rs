pub mod chunking;
pub mod file_text_extraction;
pub mod office_xml;
