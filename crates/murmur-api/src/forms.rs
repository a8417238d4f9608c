//! Boundary validation for request bodies.

use lettre::Address;
use murmur_types::api::{
    CreatePostRequest, EditProfileRequest, LoginRequest, RegisterRequest, ResetPasswordForm,
    ResetPasswordRequest, SendMessageRequest, TranslateRequest,
};

use crate::error::{ApiError, FieldErrors};
use crate::i18n::{Locale, Msg};

pub const MAX_USERNAME: usize = 64;
pub const MAX_EMAIL: usize = 120;
pub const MAX_BODY: usize = 140;

pub trait Validate {
    fn validate(&self, locale: Locale) -> Result<(), ApiError>;
}

struct Checker {
    errors: FieldErrors,
    locale: Locale,
}

impl Checker {
    fn new(locale: Locale) -> Self {
        Self {
            errors: FieldErrors::default(),
            locale,
        }
    }

    fn required(&mut self, field: &'static str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.add(field, Msg::FieldRequired.text(self.locale));
        }
        self
    }

    /// Measured on the trimmed value, which is what gets stored.
    fn max_len(&mut self, field: &'static str, value: &str, max: usize) -> &mut Self {
        if value.trim().chars().count() > max {
            self.errors.add(field, Msg::FieldTooLong(max).text(self.locale));
        }
        self
    }

    fn email(&mut self, field: &'static str, value: &str) -> &mut Self {
        let value = value.trim();
        if !value.is_empty() && value.parse::<Address>().is_err() {
            self.errors.add(field, Msg::InvalidEmail.text(self.locale));
        }
        self
    }

    fn equal(&mut self, field: &'static str, value: &str, other: &str) -> &mut Self {
        if value != other {
            self.errors.add(field, Msg::PasswordsMustMatch.text(self.locale));
        }
        self
    }

    fn finish(&mut self) -> Result<(), ApiError> {
        std::mem::take(&mut self.errors).into_result()
    }
}

impl Validate for LoginRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("username", &self.username)
            .required("password", &self.password)
            .finish()
    }
}

impl Validate for RegisterRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("username", &self.username)
            .max_len("username", &self.username, MAX_USERNAME)
            .required("email", &self.email)
            .email("email", &self.email)
            .max_len("email", &self.email, MAX_EMAIL)
            .required("password", &self.password)
            .required("password2", &self.password2)
            .equal("password2", &self.password2, &self.password)
            .finish()
    }
}

impl Validate for ResetPasswordRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("email", &self.email)
            .email("email", &self.email)
            .finish()
    }
}

impl Validate for ResetPasswordForm {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("password", &self.password)
            .required("password2", &self.password2)
            .equal("password2", &self.password2, &self.password)
            .finish()
    }
}

impl Validate for CreatePostRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("post", &self.post)
            .max_len("post", &self.post, MAX_BODY)
            .finish()
    }
}

impl Validate for EditProfileRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("username", &self.username)
            .max_len("username", &self.username, MAX_USERNAME)
            .max_len("about_me", self.about_me.as_deref().unwrap_or_default(), MAX_BODY)
            .finish()
    }
}

impl Validate for SendMessageRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("message", &self.message)
            .max_len("message", &self.message, MAX_BODY)
            .finish()
    }
}

impl Validate for TranslateRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        Checker::new(locale)
            .required("text", &self.text)
            .required("source_language", &self.source_language)
            .required("dest_language", &self.dest_language)
            .finish()
    }
}
