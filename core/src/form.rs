//! Headless "create user" form.
//!
//! Holds two required text fields, validates them (plus an optional
//! pluggable `Schema`), and submits through `UsersApi::mutate`. The form
//! never refetches anything itself: a successful create invalidates the
//! `User` tag and every subscribed list refreshes on its own.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::watch;
use tracing::debug;

use crate::api::UsersApi;
use crate::client::MutationOutput;
use crate::endpoint::Mutation;
use crate::error::ApiError;
use crate::http::Transport;
use crate::types::{NewUser, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    FirstName,
    LastName,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::FirstName, Field::LastName];

    pub fn label(self) -> &'static str {
        match self {
            Field::FirstName => "First Name",
            Field::LastName => "Last Name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Required,
    Invalid(String),
}

impl FieldError {
    pub fn message(&self, field: Field) -> String {
        match self {
            FieldError::Required => format!("{} is required", field.label()),
            FieldError::Invalid(reason) => format!("{}: {reason}", field.label()),
        }
    }
}

pub type FieldErrors = BTreeMap<Field, FieldError>;

/// External validation applied after the required-field rule.
pub trait Schema: Send + Sync {
    fn validate(&self, values: &NewUser) -> FieldErrors;
}

/// Limits every field to `max` characters.
#[derive(Debug, Clone, Copy)]
pub struct MaxLength(pub usize);

impl Schema for MaxLength {
    fn validate(&self, values: &NewUser) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for field in Field::ALL {
            let len = field_value(values, field).chars().count();
            if len > self.0 {
                errors.insert(field, FieldError::Invalid(format!("at most {} characters", self.0)));
            }
        }
        errors
    }
}

fn field_value(values: &NewUser, field: Field) -> &str {
    match field {
        Field::FirstName => &values.first_name,
        Field::LastName => &values.last_name,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Validation failed; nothing was sent.
    Invalid,
    Failed(ApiError),
    Created(User),
}

/// Read-only view of whether a form's create request is in flight. Stays
/// usable while `submit` holds the form mutably.
#[derive(Debug, Clone)]
pub struct SubmitStatus {
    receiver: watch::Receiver<bool>,
}

impl SubmitStatus {
    pub fn is_submitting(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the flag to flip. Returns `false` once the form is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

pub struct CreateUserForm {
    values: NewUser,
    errors: FieldErrors,
    schema: Option<Box<dyn Schema>>,
    submitting: watch::Sender<bool>,
    submit_error: Option<ApiError>,
}

impl Default for CreateUserForm {
    fn default() -> Self {
        let (submitting, _) = watch::channel(false);
        Self {
            values: NewUser::default(),
            errors: FieldErrors::new(),
            schema: None,
            submitting,
            submit_error: None,
        }
    }
}

impl fmt::Debug for CreateUserForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUserForm")
            .field("values", &self.values)
            .field("errors", &self.errors)
            .field("submitting", &self.is_submitting())
            .field("submit_error", &self.submit_error)
            .finish_non_exhaustive()
    }
}

impl CreateUserForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: impl Schema + 'static) -> Self {
        Self {
            schema: Some(Box::new(schema)),
            ..Self::default()
        }
    }

    /// Set a field. Clears that field's error, like re-typing in a UI.
    pub fn set(&mut self, field: Field, value: &str) {
        match field {
            Field::FirstName => self.values.first_name = value.to_string(),
            Field::LastName => self.values.last_name = value.to_string(),
        }
        self.errors.remove(&field);
    }

    pub fn value(&self, field: Field) -> &str {
        field_value(&self.values, field)
    }

    pub fn values(&self) -> &NewUser {
        &self.values
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn error_message(&self, field: Field) -> Option<String> {
        self.errors.get(&field).map(|e| e.message(field))
    }

    pub fn is_submitting(&self) -> bool {
        *self.submitting.borrow()
    }

    pub fn submit_status(&self) -> SubmitStatus {
        SubmitStatus {
            receiver: self.submitting.subscribe(),
        }
    }

    pub fn submit_error(&self) -> Option<&ApiError> {
        self.submit_error.as_ref()
    }

    /// Run the required rule and the schema; store and report the errors.
    pub fn validate(&mut self) -> bool {
        let mut errors = FieldErrors::new();
        if let Some(schema) = &self.schema {
            errors.extend(schema.validate(&self.values));
        }
        for field in Field::ALL {
            if field_value(&self.values, field).trim().is_empty() {
                errors.insert(field, FieldError::Required);
            }
        }
        self.errors = errors;
        self.errors.is_empty()
    }

    pub async fn submit<T: Transport>(&mut self, api: &UsersApi<T>) -> SubmitOutcome {
        self.submit_error = None;
        if !self.validate() {
            debug!(fields = self.errors.len(), "create form rejected by validation");
            return SubmitOutcome::Invalid;
        }

        self.submitting.send_replace(true);
        let result = api.mutate(Mutation::CreateUser(self.values.clone())).await;
        self.submitting.send_replace(false);

        match result {
            Ok(MutationOutput::Created(user)) => {
                self.values = NewUser::default();
                self.errors.clear();
                SubmitOutcome::Created(user)
            }
            Ok(other) => {
                let e = ApiError::DeserializationError(format!("unexpected create result: {other:?}"));
                self.submit_error = Some(e.clone());
                SubmitOutcome::Failed(e)
            }
            Err(e) => {
                debug!(error = %e, "create failed, keeping form values");
                self.submit_error = Some(e.clone());
                SubmitOutcome::Failed(e)
            }
        }
    }
}
