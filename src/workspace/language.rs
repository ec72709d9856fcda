/// Fallback tag for anything we cannot classify.
pub const PLAINTEXT: &str = "plaintext";

const BY_EXTENSION: &[(&str, &str)] = &[
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("json", "json"),
    ("rs", "rust"),
    ("py", "python"),
    ("go", "go"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("java", "java"),
    ("md", "markdown"),
    ("html", "html"),
    ("css", "css"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("sh", "shell"),
];

const BY_FILE_NAME: &[(&str, &str)] = &[("Dockerfile", "dockerfile"), ("Makefile", "makefile")];

/// Language tag for a workspace path, from its file name or extension.
pub fn language_for_path(path: &str) -> &'static str {
    let name = crate::utils::file_name(path);
    if let Some((_, lang)) = BY_FILE_NAME.iter().find(|(n, _)| *n == name) {
        return *lang;
    }
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return PLAINTEXT;
    };
    if stem.is_empty() {
        return PLAINTEXT;
    }
    let ext = ext.to_ascii_lowercase();
    BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
        .unwrap_or(PLAINTEXT)
}
