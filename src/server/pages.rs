//! Static HTML for the browser flow.

use crate::auth::CSRF_FIELD;
use crate::merge::UploadLimits;

/// Upload form with the anti-forgery token embedded ahead of the files.
pub fn index(csrf_token: &str, limits: &UploadLimits) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Audio Joiner</title>
</head>
<body>
  <h1>Audio Joiner</h1>
  <p>Up to {max_files} files, {per_file} MB each, {total} MB in total.</p>
  <form action="/merge" method="post" enctype="multipart/form-data">
    <input type="hidden" name="{field}" value="{token}">
    <label>Files per group <input type="number" name="count" min="1" value="2" required></label>
    <input type="file" name="files" accept=".mp3,.wav,.ogg,.flac,.m4a,audio/*" multiple required>
    <button type="submit">Merge</button>
  </form>
  <p><a href="/how-it-works">How it works</a></p>
</body>
</html>
"#,
        max_files = limits.max_files,
        per_file = limits.max_per_file_mb(),
        total = limits.max_content_length_mb(),
        field = CSRF_FIELD,
        token = csrf_token,
    )
}

pub const HOW_IT_WORKS: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>How it works</title>
</head>
<body>
  <h1>How it works</h1>
  <ol>
    <li>Select audio files in the order they should be played.</li>
    <li>Choose how many files go into each merged track.</li>
    <li>Files are split into consecutive groups of that size; the last group may be shorter.</li>
    <li>Each group is joined into one MP3 and all results are returned in <code>merged_files.zip</code>.</li>
  </ol>
  <p>Scripts can call <code>POST /merge</code> with an <code>Authorization: Bearer &lt;token&gt;</code> header.</p>
  <p><a href="/">Back</a></p>
</body>
</html>
"#;
