pub mod chat;
pub mod finetune;
pub mod jobs;
pub mod probes;
pub mod upload;
