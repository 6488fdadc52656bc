//! Directory of parties that can be asked for consent.
//!
//! Clients and jobseeker profiles are owned by other parts of the product; this
//! module only reads them (plus the small write surface used by the startup
//! sync and tests).

use crate::entities;
use crate::errors::CountersignError;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Client,
    JobseekerProfile,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Client => "client",
            RecipientType::JobseekerProfile => "jobseeker_profile",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = CountersignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(RecipientType::Client),
            "jobseeker_profile" => Ok(RecipientType::JobseekerProfile),
            other => Err(CountersignError::Validation(format!(
                "recipientType must be \"client\" or \"jobseeker_profile\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub recipient_type: RecipientType,
}

impl From<entities::client::Model> for Recipient {
    fn from(model: entities::client::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            recipient_type: RecipientType::Client,
        }
    }
}

impl From<entities::jobseeker_profile::Model> for Recipient {
    fn from(model: entities::jobseeker_profile::Model) -> Self {
        let name = format!("{} {}", model.first_name, model.last_name)
            .trim()
            .to_string();
        Self {
            id: model.id,
            name,
            email: model.email,
            recipient_type: RecipientType::JobseekerProfile,
        }
    }
}

pub async fn get_recipient<C: ConnectionTrait>(
    db: &C,
    recipient_type: RecipientType,
    id: &str,
) -> Result<Option<Recipient>, CountersignError> {
    let recipient = match recipient_type {
        RecipientType::Client => entities::Client::find_by_id(id.to_string())
            .one(db)
            .await?
            .map(Recipient::from),
        RecipientType::JobseekerProfile => entities::JobseekerProfile::find_by_id(id.to_string())
            .one(db)
            .await?
            .map(Recipient::from),
    };
    Ok(recipient)
}

/// Loads every listed recipient that exists, keyed by id.
pub async fn find_many<C: ConnectionTrait>(
    db: &C,
    recipient_type: RecipientType,
    ids: &[String],
) -> Result<HashMap<String, Recipient>, CountersignError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let recipients: Vec<Recipient> = match recipient_type {
        RecipientType::Client => {
            use entities::client::{Column, Entity};
            Entity::find()
                .filter(Column::Id.is_in(ids.iter().cloned()))
                .all(db)
                .await?
                .into_iter()
                .map(Recipient::from)
                .collect()
        }
        RecipientType::JobseekerProfile => {
            use entities::jobseeker_profile::{Column, Entity};
            Entity::find()
                .filter(Column::Id.is_in(ids.iter().cloned()))
                .all(db)
                .await?
                .into_iter()
                .map(Recipient::from)
                .collect()
        }
    };

    Ok(recipients.into_iter().map(|r| (r.id.clone(), r)).collect())
}

/// Ids of recipients whose name contains `term`.
pub async fn search_ids<C: ConnectionTrait>(
    db: &C,
    recipient_type: RecipientType,
    term: &str,
) -> Result<Vec<String>, CountersignError> {
    let ids = match recipient_type {
        RecipientType::Client => {
            use entities::client::{Column, Entity};
            Entity::find()
                .select_only()
                .column(Column::Id)
                .filter(Column::Name.contains(term))
                .into_tuple::<String>()
                .all(db)
                .await?
        }
        RecipientType::JobseekerProfile => {
            use entities::jobseeker_profile::{Column, Entity};
            Entity::find()
                .select_only()
                .column(Column::Id)
                .filter(
                    Condition::any()
                        .add(Column::FirstName.contains(term))
                        .add(Column::LastName.contains(term)),
                )
                .into_tuple::<String>()
                .all(db)
                .await?
        }
    };
    Ok(ids)
}

pub async fn create_client<C: ConnectionTrait>(
    db: &C,
    id: &str,
    name: &str,
    email: Option<String>,
) -> Result<Recipient, CountersignError> {
    let model = entities::client::ActiveModel {
        id: Set(id.to_string()),
        name: Set(name.to_string()),
        email: Set(email),
        created_at: Set(Utc::now().timestamp()),
    }
    .insert(db)
    .await?;
    Ok(model.into())
}

pub async fn create_jobseeker_profile<C: ConnectionTrait>(
    db: &C,
    id: &str,
    first_name: &str,
    last_name: &str,
    email: Option<String>,
) -> Result<Recipient, CountersignError> {
    let model = entities::jobseeker_profile::ActiveModel {
        id: Set(id.to_string()),
        first_name: Set(first_name.to_string()),
        last_name: Set(last_name.to_string()),
        email: Set(email),
        created_at: Set(Utc::now().timestamp()),
    }
    .insert(db)
    .await?;
    Ok(model.into())
}

pub async fn update_client<C: ConnectionTrait>(
    db: &C,
    id: &str,
    name: &str,
    email: Option<String>,
) -> Result<(), CountersignError> {
    if let Some(model) = entities::Client::find_by_id(id.to_string()).one(db).await? {
        let mut active: entities::client::ActiveModel = model.into();
        active.name = Set(name.to_string());
        active.email = Set(email);
        active.update(db).await?;
    }
    Ok(())
}

pub async fn update_jobseeker_profile<C: ConnectionTrait>(
    db: &C,
    id: &str,
    first_name: &str,
    last_name: &str,
    email: Option<String>,
) -> Result<(), CountersignError> {
    if let Some(model) = entities::JobseekerProfile::find_by_id(id.to_string())
        .one(db)
        .await?
    {
        let mut active: entities::jobseeker_profile::ActiveModel = model.into();
        active.first_name = Set(first_name.to_string());
        active.last_name = Set(last_name.to_string());
        active.email = Set(email);
        active.update(db).await?;
    }
    Ok(())
}
