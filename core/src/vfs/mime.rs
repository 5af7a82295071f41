//! MIME detection by file name

use std::path::Path;

/// Extensions whose type differs from what `mime_guess` reports, or that it
/// does not know
const OVERRIDES: &[(&str, &str)] = &[
    ("md", "text/markdown"),
    ("cfg", "text/plain"),
    ("txt", "text/plain"),
    ("conf", "text/plain"),
    ("ini", "text/plain"),
    ("php", "text/x-php"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("js", "text/javascript"),
    ("css", "text/css"),
    ("rtf", "text/rtf"),
    ("rtfd", "text/rtfd"),
    ("py", "text/x-python"),
    ("java", "text/x-java-source"),
    ("rb", "text/x-ruby"),
    ("sh", "text/x-shellscript"),
    ("pl", "text/x-perl"),
    ("sql", "text/x-sql"),
    ("doc", "application/msword"),
    ("ogg", "application/ogg"),
    ("7z", "application/x-7z-compressed"),
    ("ogm", "application/ogm"),
    ("mkv", "video/x-matroska"),
    ("tar", "application/x-tar"),
    ("tgz", "application/x-gzip"),
    ("gz", "application/x-gzip"),
];

/// Extension-less names that are plain text by convention
const TEXT_NAMES: &[&str] = &["README", "ChangeLog", "LICENSE", "Makefile"];

pub const UNKNOWN: &str = "unknown";

/// Detect the MIME type of a file from its name
pub fn mime_for(path: &Path) -> String {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return UNKNOWN.to_string(),
    };

    if let Some(ext) = extension(&name) {
        let ext = ext.to_ascii_lowercase();
        if let Some((_, mime)) = OVERRIDES.iter().find(|(known, _)| *known == ext) {
            return (*mime).to_string();
        }
        if let Some(mime) = mime_guess::from_ext(&ext).first_raw() {
            return mime.to_string();
        }
    }

    if TEXT_NAMES.contains(&name.as_ref()) {
        return "text/plain".to_string();
    }

    UNKNOWN.to_string()
}

/// Extension after the last dot, ignoring a leading dot of hidden files
fn extension(name: &str) -> Option<&str> {
    let trimmed = name.strip_prefix('.').unwrap_or(name);
    trimmed.rfind('.').map(|idx| &trimmed[idx + 1..])
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}
