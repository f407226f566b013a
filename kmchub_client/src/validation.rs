//! Pure form validators. Each returns every problem it finds so a form can
//! show all of them at once.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;

use crate::forms::{CommentValues, LoginValues, PostValues, SignupValues};
use crate::models::{MediaKind, Role};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const ID_NUMBER_LEN: usize = 8;
pub const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

lazy_static::lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    Email,
    Password,
    Role,
    IdNumber,
    AdditionalInfo,
    Avatar,
    Content,
    MediaType,
    Media,
    Text,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Password => "password",
            Field::Role => "role",
            Field::IdNumber => "idNumber",
            Field::AdditionalInfo => "additionalInfo",
            Field::Avatar => "avatar",
            Field::Content => "content",
            Field::MediaType => "mediaType",
            Field::Media => "media",
            Field::Text => "text",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field name to messages. A field may collect more than one message (an
/// avatar can be both the wrong type and too large).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: BTreeMap<Field, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: Field, message: impl Into<String>) {
        self.errors.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.errors.contains_key(&field)
    }

    /// First message for `field`.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.errors
            .get(&field)
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    pub fn messages(&self, field: Field) -> &[String] {
        self.errors.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear(&mut self, field: Field) {
        self.errors.remove(&field);
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.errors.keys().copied()
    }

    pub fn total(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    if email.is_empty() {
        errors.add(Field::Email, "Email is required");
    } else if !is_valid_email(email) {
        errors.add(Field::Email, "Invalid email format");
    }
}

pub fn validate_login(values: &LoginValues) -> FieldErrors {
    let mut errors = FieldErrors::new();
    check_email(&mut errors, &values.email);
    if values.password.is_empty() {
        errors.add(Field::Password, "Password is required");
    }
    errors
}

pub fn validate_signup(values: &SignupValues) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if values.name.trim().is_empty() {
        errors.add(Field::Name, "Name is required");
    }
    check_email(&mut errors, &values.email);
    if values.password.is_empty() {
        errors.add(Field::Password, "Password is required");
    } else if values.password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(Field::Password, "Password must be at least 6 characters");
    }

    let role = if values.role.is_empty() {
        errors.add(Field::Role, "Role is required");
        None
    } else {
        match values.role.parse::<Role>() {
            Ok(role) => Some(role),
            Err(_) => {
                errors.add(Field::Role, "Role must be Student, Teacher, or Admin");
                None
            }
        }
    };
    if role == Some(Role::Student) {
        let id_number = values.id_number.trim();
        if id_number.is_empty() {
            errors.add(Field::IdNumber, "ID Number is required for Students");
        } else if id_number.len() != ID_NUMBER_LEN || !id_number.bytes().all(|b| b.is_ascii_digit()) {
            errors.add(Field::IdNumber, "ID Number must be exactly 8 digits");
        }
    }

    if let Some(avatar) = &values.avatar {
        if !avatar.is_image() {
            errors.add(Field::Avatar, "Avatar must be an image file");
        }
        if avatar.size() > MAX_AVATAR_BYTES {
            errors.add(Field::Avatar, "Avatar must be 2MB or smaller");
        }
    }
    errors
}

pub fn validate_post(values: &PostValues) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if values.content.trim().is_empty() {
        errors.add(Field::Content, "Content cannot be empty");
    }
    if let Some(file) = &values.media_file {
        match values.media_kind {
            None => errors.add(Field::MediaType, "Please select a media type first"),
            Some(kind) if MediaKind::from_mime(&file.mime) != Some(kind) => errors.add(
                Field::Media,
                format!("Selected file is not a valid {} file", kind.as_str()),
            ),
            Some(_) => {}
        }
    }
    errors
}

pub fn validate_comment(values: &CommentValues) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if values.text.trim().is_empty() {
        errors.add(Field::Text, "Please enter a comment");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileUpload;
    use pretty_assertions::assert_eq;

    fn signup(role: &str, id_number: &str) -> SignupValues {
        SignupValues {
            name: "Ada".into(),
            email: "ada@kmc.edu".into(),
            password: "secret1".into(),
            role: role.into(),
            id_number: id_number.into(),
            ..Default::default()
        }
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("a@b.c"));
        assert!(is_valid_email("first.last@dept.kmc.edu"));
        for bad in ["abc", "a@b", "", "a b@c.d", "a@@b.c", "@b.c"] {
            assert!(!is_valid_email(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn login_collects_all_errors() {
        let errors = validate_login(&LoginValues::default());
        assert_eq!(errors.get(Field::Email), Some("Email is required"));
        assert_eq!(errors.get(Field::Password), Some("Password is required"));
        assert_eq!(errors.total(), 2);
    }

    #[test]
    fn login_has_no_password_length_rule() {
        let errors = validate_login(&LoginValues {
            email: "a@b.c".into(),
            password: "x".into(),
        });
        assert!(errors.is_empty());
    }

    #[test]
    fn student_id_number_must_be_eight_digits() {
        let errors = validate_signup(&signup("Student", "1234"));
        assert_eq!(errors.get(Field::IdNumber), Some("ID Number must be exactly 8 digits"));

        assert!(validate_signup(&signup("Student", "12345678")).is_empty());
        assert!(validate_signup(&signup("Student", "1234567a")).contains(Field::IdNumber));
        assert_eq!(
            validate_signup(&signup("Student", "")).get(Field::IdNumber),
            Some("ID Number is required for Students")
        );
    }

    #[test]
    fn non_students_do_not_need_id_number() {
        assert!(validate_signup(&signup("Teacher", "")).is_empty());
        assert!(validate_signup(&signup("Admin", "")).is_empty());
    }

    #[test]
    fn role_must_be_known() {
        assert_eq!(
            validate_signup(&signup("", "")).get(Field::Role),
            Some("Role is required")
        );
        assert_eq!(
            validate_signup(&signup("Janitor", "")).get(Field::Role),
            Some("Role must be Student, Teacher, or Admin")
        );
    }

    #[test]
    fn short_password_is_rejected() {
        let mut values = signup("Teacher", "");
        values.password = "12345".into();
        assert_eq!(
            validate_signup(&values).get(Field::Password),
            Some("Password must be at least 6 characters")
        );
    }

    #[test]
    fn avatar_violations_are_reported_separately() {
        let mut values = signup("Teacher", "");
        values.avatar = Some(FileUpload::new(
            "notes.pdf",
            "application/pdf",
            vec![0; MAX_AVATAR_BYTES + 1],
        ));
        let errors = validate_signup(&values);
        assert_eq!(
            errors.messages(Field::Avatar),
            &[
                "Avatar must be an image file".to_string(),
                "Avatar must be 2MB or smaller".to_string()
            ]
        );

        values.avatar = Some(FileUpload::new("me.png", "image/png", vec![0; MAX_AVATAR_BYTES]));
        assert!(validate_signup(&values).is_empty());
    }

    #[test]
    fn everything_wrong_at_once() {
        let values = SignupValues {
            role: "Student".into(),
            ..Default::default()
        };
        let errors = validate_signup(&values);
        let fields: Vec<Field> = errors.fields().collect();
        assert_eq!(
            fields,
            vec![Field::Name, Field::Email, Field::Password, Field::IdNumber]
        );
    }

    #[test]
    fn post_rules() {
        let mut values = PostValues::default();
        assert_eq!(
            validate_post(&values).get(Field::Content),
            Some("Content cannot be empty")
        );

        values.content = "Hello".into();
        values.media_file = Some(FileUpload::new("a.png", "image/png", vec![1]));
        assert_eq!(
            validate_post(&values).get(Field::MediaType),
            Some("Please select a media type first")
        );

        values.media_kind = Some(MediaKind::Video);
        assert!(validate_post(&values).contains(Field::Media));

        values.media_kind = Some(MediaKind::Image);
        assert!(validate_post(&values).is_empty());
    }

    #[test]
    fn comment_text_required() {
        assert!(validate_comment(&CommentValues { text: "  ".into() }).contains(Field::Text));
        assert!(validate_comment(&CommentValues { text: "nice".into() }).is_empty());
    }
}
