//! Locale negotiation and the catalogue of user-visible messages.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    Es,
}

impl Locale {
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
        }
    }

    /// Accepts a bare language code or a tag with a region (`es-MX`).
    pub fn from_code(code: &str) -> Option<Self> {
        let primary = code.split(['-', '_']).next()?.trim().to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            _ => None,
        }
    }

    /// Pick the best supported locale for an `Accept-Language` header.
    pub fn negotiate(accept_language: Option<&str>, supported: &[Locale]) -> Locale {
        let fallback = supported.first().copied().unwrap_or_default();
        let Some(header) = accept_language else {
            return fallback;
        };

        let mut ranges: Vec<(Locale, f32)> = header
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.trim().split(';');
                let tag = pieces.next()?.trim();
                let quality = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .map(|q| q.trim().parse::<f32>().unwrap_or(0.0))
                    .unwrap_or(1.0);
                let locale = Locale::from_code(tag)?;
                (quality > 0.0 && supported.contains(&locale)).then_some((locale, quality))
            })
            .collect();

        // Stable sort keeps header order among equal weights.
        ranges.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranges.first().map(|(l, _)| *l).unwrap_or(fallback)
    }
}

impl FromRequestParts<AppState> for Locale {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok());
        Ok(Locale::negotiate(header, &state.settings.languages))
    }
}

/// User-visible messages.
#[derive(Debug, Clone, Copy)]
pub enum Msg<'a> {
    // Titles
    SignIn,
    Register,
    ResetPassword,

    // Flash messages
    PostLive,
    InvalidCredentials,
    LoginRequired,
    LoggedOut,
    Registered,
    CheckEmail,
    PasswordWasReset,
    ChangesSaved,
    UserNotFound(&'a str),
    CannotFollowSelf,
    CannotUnfollowSelf,
    NowFollowing(&'a str),
    NotFollowing(&'a str),
    InvalidFormToken,
    InvalidRequest,
    MessageSent,
    ExportInProgress,
    ExportingPosts,
    TranslationNotConfigured,
    TranslationFailed,

    // Field validation
    FieldRequired,
    FieldTooLong(usize),
    InvalidEmail,
    PasswordsMustMatch,
    UsernameTaken,
    EmailTaken,
}

impl Msg<'_> {
    pub fn text(&self, locale: Locale) -> String {
        match locale {
            Locale::En => self.english(),
            Locale::Es => self.spanish(),
        }
    }

    fn english(&self) -> String {
        match self {
            Self::SignIn => "Sign In".into(),
            Self::Register => "Register".into(),
            Self::ResetPassword => "Reset Password".into(),
            Self::PostLive => "Your post is now live!".into(),
            Self::InvalidCredentials => "Invalid username or password".into(),
            Self::LoginRequired => "Please log in to access this page.".into(),
            Self::LoggedOut => "You have been logged out.".into(),
            Self::Registered => "Congratulations, you are now a registered user!".into(),
            Self::CheckEmail => "Check your email for the instructions to reset your password".into(),
            Self::PasswordWasReset => "Your password has been reset.".into(),
            Self::ChangesSaved => "Your changes have been saved.".into(),
            Self::UserNotFound(name) => format!("User {name} not found."),
            Self::CannotFollowSelf => "You cannot follow yourself!".into(),
            Self::CannotUnfollowSelf => "You cannot unfollow yourself!".into(),
            Self::NowFollowing(name) => format!("You are following {name}!"),
            Self::NotFollowing(name) => format!("You are not following {name}."),
            Self::InvalidFormToken => "The form has expired, please try again.".into(),
            Self::InvalidRequest => "The request could not be understood.".into(),
            Self::MessageSent => "Your message has been sent.".into(),
            Self::ExportInProgress => "An export task is currently in progress".into(),
            Self::ExportingPosts => "Exporting posts...".into(),
            Self::TranslationNotConfigured => "Error: the translation service is not configured.".into(),
            Self::TranslationFailed => "Error: the translation service failed.".into(),
            Self::FieldRequired => "This field is required.".into(),
            Self::FieldTooLong(max) => format!("Field cannot be longer than {max} characters."),
            Self::InvalidEmail => "Invalid email address.".into(),
            Self::PasswordsMustMatch => "Field must be equal to password.".into(),
            Self::UsernameTaken => "Please use a different username.".into(),
            Self::EmailTaken => "Please use a different email address.".into(),
        }
    }

    fn spanish(&self) -> String {
        match self {
            Self::SignIn => "Ingresar".into(),
            Self::Register => "Registrarse".into(),
            Self::ResetPassword => "Nueva Contraseña".into(),
            Self::PostLive => "¡Tu artículo ha sido publicado!".into(),
            Self::InvalidCredentials => "Nombre de usuario o contraseña inválidos".into(),
            Self::LoginRequired => "Por favor ingrese para acceder a esta página.".into(),
            Self::LoggedOut => "Has cerrado la sesión.".into(),
            Self::Registered => "¡Felicitaciones, ya eres un usuario registrado!".into(),
            Self::CheckEmail => "Busca en tu email las instrucciones para crear una nueva contraseña".into(),
            Self::PasswordWasReset => "Tu contraseña ha sido cambiada.".into(),
            Self::ChangesSaved => "Tus cambios han sido salvados.".into(),
            Self::UserNotFound(name) => format!("El usuario {name} no ha sido encontrado."),
            Self::CannotFollowSelf => "¡No te puedes seguir a ti mismo!".into(),
            Self::CannotUnfollowSelf => "¡No te puedes dejar de seguir a ti mismo!".into(),
            Self::NowFollowing(name) => format!("¡Ahora estás siguiendo a {name}!"),
            Self::NotFollowing(name) => format!("No estás siguiendo a {name}."),
            Self::InvalidFormToken => "El formulario ha expirado, inténtalo de nuevo.".into(),
            Self::InvalidRequest => "No se ha podido entender la solicitud.".into(),
            Self::MessageSent => "Tu mensaje ha sido enviado.".into(),
            Self::ExportInProgress => "Una tarea de exportación esta en progreso".into(),
            Self::ExportingPosts => "Exportando artículos...".into(),
            Self::TranslationNotConfigured => "Error: el servicio de traducciones no está configurado.".into(),
            Self::TranslationFailed => "Error: el servicio de traducciones falló.".into(),
            Self::FieldRequired => "Este campo es obligatorio.".into(),
            Self::FieldTooLong(max) => format!("El campo no puede tener más de {max} caracteres."),
            Self::InvalidEmail => "Dirección de email inválida.".into(),
            Self::PasswordsMustMatch => "El campo debe ser igual a la contraseña.".into(),
            Self::UsernameTaken => "Por favor use un nombre de usuario diferente.".into(),
            Self::EmailTaken => "Por favor use una dirección de email diferente.".into(),
        }
    }
}
