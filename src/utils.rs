use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use indicatif::{ProgressBar, ProgressStyle};

pub fn progress_bar(len: u64) -> ProgressBar {
    ProgressBar::new(len).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {human_pos}/{human_len} {percent}% ({per_sec}) {msg}",
        )
        .expect("hardcoded"),
    )
}

/// Writes `contents` next to `path` and renames it into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    let mut file = File::create(tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, path)
}
