//! Headless form state: values, per-field errors, a global API error and the
//! submission phase. Renderers read these and call back into them; nothing
//! here touches the network.

use std::time::{Duration, Instant};

use crate::models::{
    FileUpload, LoginInput, MediaKind, NewPost, PostAttachment, SignupInput,
};
use crate::validation::{self, Field, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub path: &'static str,
    pub delay: Duration,
}

pub const AFTER_LOGIN: Redirect = Redirect {
    path: "/feed",
    delay: Duration::from_millis(1500),
};

pub const AFTER_SIGNUP: Redirect = Redirect {
    path: "/login",
    delay: Duration::from_millis(2000),
};

/// How long the post form shows its success state before going idle.
pub const POST_SUCCESS_LINGER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormPhase {
    Idle,
    Submitting,
    Succeeded {
        at: Instant,
        redirect: Option<Redirect>,
    },
}

pub trait FormValues: Default {
    type Payload;

    fn validate(&self) -> FieldErrors;

    /// Builds the request payload. Only called once `validate` came back
    /// clean; `None` means the values still could not be converted.
    fn payload(&self) -> Option<Self::Payload>;

    fn set_text(&mut self, field: Field, value: String);
}

#[derive(Debug)]
pub struct Form<V> {
    values: V,
    errors: FieldErrors,
    api_error: Option<String>,
    phase: FormPhase,
}

impl<V: FormValues> Default for Form<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: FormValues> Form<V> {
    pub fn new() -> Self {
        Self::with_values(V::default())
    }

    pub fn with_values(values: V) -> Self {
        Self {
            values,
            errors: FieldErrors::new(),
            api_error: None,
            phase: FormPhase::Idle,
        }
    }

    pub fn values(&self) -> &V {
        &self.values
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn api_error(&self) -> Option<&str> {
        self.api_error.as_deref()
    }

    pub fn phase(&self) -> FormPhase {
        self.phase
    }

    pub fn is_submitting(&self) -> bool {
        self.phase == FormPhase::Submitting
    }

    pub fn can_submit(&self) -> bool {
        !self.is_submitting()
    }

    pub fn edit(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        self.edit_with(field, |values| values.set_text(field, value));
    }

    /// Applies an arbitrary change to the values. The error for `field` and
    /// the global API error are cleared.
    pub fn edit_with(&mut self, field: Field, change: impl FnOnce(&mut V)) {
        change(&mut self.values);
        self.errors.clear(field);
        self.api_error = None;
    }

    /// Validates and, if clean, moves to `Submitting` and hands out the
    /// payload. Returns `None` while a submission is already in flight or
    /// when validation failed.
    pub fn begin_submit(&mut self) -> Option<V::Payload> {
        if self.is_submitting() {
            return None;
        }
        self.api_error = None;
        self.errors = self.values.validate();
        if !self.errors.is_empty() {
            self.phase = FormPhase::Idle;
            return None;
        }
        let payload = self.values.payload()?;
        self.phase = FormPhase::Submitting;
        Some(payload)
    }

    pub fn succeed(&mut self, redirect: Option<Redirect>) {
        self.phase = FormPhase::Succeeded {
            at: Instant::now(),
            redirect,
        };
    }

    /// Records a form-level error and makes the form editable again.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.api_error = Some(message.into());
        self.phase = FormPhase::Idle;
    }

    /// Clears values and errors, back to a fresh idle form.
    pub fn reset(&mut self) {
        self.values = V::default();
        self.errors = FieldErrors::new();
        self.api_error = None;
        self.phase = FormPhase::Idle;
    }

    /// The redirect target once its delay has elapsed.
    pub fn redirect_due(&self, now: Instant) -> Option<&'static str> {
        match self.phase {
            FormPhase::Succeeded {
                at,
                redirect: Some(redirect),
            } if now.saturating_duration_since(at) >= redirect.delay => Some(redirect.path),
            _ => None,
        }
    }

    /// Returns a lingering success state without a redirect to `Idle` once
    /// `linger` has elapsed.
    pub fn settle(&mut self, now: Instant, linger: Duration) {
        if let FormPhase::Succeeded { at, redirect: None } = self.phase {
            if now.saturating_duration_since(at) >= linger {
                self.phase = FormPhase::Idle;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginValues {
    pub email: String,
    pub password: String,
}

impl FormValues for LoginValues {
    type Payload = LoginInput;

    fn validate(&self) -> FieldErrors {
        validation::validate_login(self)
    }

    fn payload(&self) -> Option<LoginInput> {
        Some(LoginInput {
            email: self.email.clone(),
            password: self.password.clone(),
        })
    }

    fn set_text(&mut self, field: Field, value: String) {
        match field {
            Field::Email => self.email = value,
            Field::Password => self.password = value,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignupValues {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Raw selection; validated against the known roles.
    pub role: String,
    pub id_number: String,
    pub additional_info: String,
    pub avatar: Option<FileUpload>,
}

impl FormValues for SignupValues {
    type Payload = SignupInput;

    fn validate(&self) -> FieldErrors {
        validation::validate_signup(self)
    }

    fn payload(&self) -> Option<SignupInput> {
        let role = self.role.parse().ok()?;
        let non_empty = |s: &str| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        Some(SignupInput {
            name: self.name.trim().to_string(),
            email: self.email.clone(),
            password: self.password.clone(),
            role,
            id_number: non_empty(&self.id_number),
            additional_info: non_empty(&self.additional_info),
            avatar: self.avatar.clone(),
        })
    }

    fn set_text(&mut self, field: Field, value: String) {
        match field {
            Field::Name => self.name = value,
            Field::Email => self.email = value,
            Field::Password => self.password = value,
            Field::Role => self.role = value,
            Field::IdNumber => self.id_number = value,
            Field::AdditionalInfo => self.additional_info = value,
            _ => {}
        }
    }
}

impl SignupValues {
    pub fn set_avatar(&mut self, avatar: Option<FileUpload>) {
        self.avatar = avatar;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostValues {
    pub content: String,
    pub media_kind: Option<MediaKind>,
    pub media_file: Option<FileUpload>,
}

impl PostValues {
    /// Switching the media kind discards any file picked for the old kind.
    pub fn select_media_kind(&mut self, kind: Option<MediaKind>) {
        self.media_kind = kind;
        self.media_file = None;
    }

    pub fn attach(&mut self, file: Option<FileUpload>) {
        self.media_file = file;
    }
}

impl FormValues for PostValues {
    type Payload = NewPost;

    fn validate(&self) -> FieldErrors {
        validation::validate_post(self)
    }

    fn payload(&self) -> Option<NewPost> {
        let media = match (&self.media_file, self.media_kind) {
            (Some(file), Some(kind)) => Some(PostAttachment {
                kind,
                file: file.clone(),
            }),
            (Some(_), None) => return None,
            (None, _) => None,
        };
        Some(NewPost {
            content: self.content.clone(),
            media,
        })
    }

    fn set_text(&mut self, field: Field, value: String) {
        match field {
            Field::Content => self.content = value,
            Field::MediaType => self.select_media_kind(value.parse().ok()),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentValues {
    pub text: String,
}

impl FormValues for CommentValues {
    type Payload = String;

    fn validate(&self) -> FieldErrors {
        validation::validate_comment(self)
    }

    fn payload(&self) -> Option<String> {
        Some(self.text.trim().to_string())
    }

    fn set_text(&mut self, field: Field, value: String) {
        if field == Field::Text {
            self.text = value;
        }
    }
}
