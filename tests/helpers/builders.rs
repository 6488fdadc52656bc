use super::db::TestApp;
use countersign::recipients::{self, Recipient, RecipientType};
use countersign::workflow::{ConsentRequestCreated, NewConsentRequest};
use countersign::errors::CountersignError;
use sea_orm::DatabaseConnection;

/// Builder for creating recipients in the directory
pub struct RecipientBuilder {
    id: String,
    recipient_type: RecipientType,
    first_name: String,
    last_name: String,
    email: Option<String>,
}

impl RecipientBuilder {
    pub fn jobseeker(id: &str) -> Self {
        Self {
            id: id.to_string(),
            recipient_type: RecipientType::JobseekerProfile,
            first_name: "Test".to_string(),
            last_name: id.to_string(),
            email: Some(format!("{}@example.com", id)),
        }
    }

    pub fn client(id: &str) -> Self {
        Self {
            recipient_type: RecipientType::Client,
            ..Self::jobseeker(id)
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = first_name.to_string();
        self.last_name = last_name.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn without_email(mut self) -> Self {
        self.email = None;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> Recipient {
        match self.recipient_type {
            RecipientType::Client => recipients::create_client(
                db,
                &self.id,
                &format!("{} {}", self.first_name, self.last_name),
                self.email,
            )
            .await
            .expect("Failed to create test client"),
            RecipientType::JobseekerProfile => recipients::create_jobseeker_profile(
                db,
                &self.id,
                &self.first_name,
                &self.last_name,
                self.email,
            )
            .await
            .expect("Failed to create test jobseeker profile"),
        }
    }
}

/// Builder for consent requests. Uploads the document bytes first unless an
/// explicit path is given.
pub struct ConsentRequestBuilder {
    file_name: String,
    file_path: Option<String>,
    recipient_ids: Vec<String>,
    recipient_type: RecipientType,
    uploaded_by: String,
}

impl ConsentRequestBuilder {
    pub fn new(recipient_ids: &[&str]) -> Self {
        Self {
            file_name: "nda.pdf".to_string(),
            file_path: None,
            recipient_ids: recipient_ids.iter().map(|id| id.to_string()).collect(),
            recipient_type: RecipientType::JobseekerProfile,
            uploaded_by: "hr@example.com".to_string(),
        }
    }

    pub fn file_name(mut self, file_name: &str) -> Self {
        self.file_name = file_name.to_string();
        self
    }

    pub fn file_path(mut self, file_path: &str) -> Self {
        self.file_path = Some(file_path.to_string());
        self
    }

    pub fn recipient_type(mut self, recipient_type: RecipientType) -> Self {
        self.recipient_type = recipient_type;
        self
    }

    pub async fn try_create(self, app: &TestApp) -> Result<ConsentRequestCreated, CountersignError> {
        let file_path = match self.file_path {
            Some(path) => path,
            None => app.upload(&self.file_name, b"%PDF-1.4 test document").await,
        };
        app.service
            .create_request(
                NewConsentRequest {
                    file_name: self.file_name,
                    file_path,
                    recipient_ids: self.recipient_ids,
                    recipient_type: self.recipient_type,
                },
                &self.uploaded_by,
            )
            .await
    }

    pub async fn create(self, app: &TestApp) -> ConsentRequestCreated {
        self.try_create(app)
            .await
            .expect("Failed to create consent request")
    }
}
