pub mod client;
pub mod consent_document;
pub mod consent_record;
pub mod job_execution;
pub mod jobseeker_profile;

pub use client::Entity as Client;
pub use consent_document::Entity as ConsentDocument;
pub use consent_record::Entity as ConsentRecord;
pub use job_execution::Entity as JobExecution;
pub use jobseeker_profile::Entity as JobseekerProfile;
