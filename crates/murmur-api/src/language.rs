use whatlang::Lang;

pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code of the text's language, when one can be told.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Offline detection with whatlang. Posts are short, so whatlang rarely
/// calls its guess reliable; the best guess is kept anyway.
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let info = whatlang::detect(text)?;
        Some(iso_639_1(info.lang()).to_string())
    }
}

fn iso_639_1(lang: Lang) -> &'static str {
    match lang.code() {
        "eng" => "en",
        "spa" => "es",
        "fra" => "fr",
        "deu" => "de",
        "ita" => "it",
        "por" => "pt",
        "rus" => "ru",
        "jpn" => "ja",
        "cmn" => "zh",
        "kor" => "ko",
        "ara" => "ar",
        "hin" => "hi",
        "nld" => "nl",
        "pol" => "pl",
        "tur" => "tr",
        "swe" => "sv",
        "ukr" => "uk",
        other => other,
    }
}
