use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;
use walkdir::WalkDir;

use crate::models::ChapterSource;

/// Reads every `*.txt` chapter file under `dir`, in path order.
pub fn read_chapter_dir(dir: &Path) -> Result<Vec<ChapterSource>> {
    if !dir.is_dir() {
        anyhow::bail!("chapter directory not found: {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let numbering = ChapterNumbering::new()?;
    let mut chapters = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading chapter file {}", path.display()))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        match parse_chapter(&numbering, stem, &text) {
            Some(chapter) => chapters.push(chapter),
            None => warn!(
                path = %path.display(),
                "no chapter number in title or file name, skipping"
            ),
        }
    }

    Ok(chapters)
}

/// Finds a chapter number, preferring an explicit `Chapter N` label over the
/// first bare integer, so `Volume 2 Chapter 15` yields 15.
struct ChapterNumbering {
    labelled: Regex,
    bare: Regex,
}

impl ChapterNumbering {
    fn new() -> Result<Self> {
        Ok(Self {
            labelled: Regex::new(r"(?i)(?:^|[^a-z])(?:chapter|ch\.?)[\s_-]*(\d+)")?,
            bare: Regex::new(r"\d+")?,
        })
    }

    fn number_in(&self, text: &str) -> Option<i64> {
        let labelled = self
            .labelled
            .captures_iter(text)
            .find_map(|caps| caps.get(1)?.as_str().parse::<i64>().ok());
        labelled.or_else(|| {
            self.bare
                .find_iter(text)
                .find_map(|m| m.as_str().parse::<i64>().ok())
        })
    }
}

/// Title is the first non-empty line, the body is everything after it. The
/// chapter number comes from the title, else from the file stem.
fn parse_chapter(numbering: &ChapterNumbering, stem: &str, text: &str) -> Option<ChapterSource> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines = text.lines();
    let title = lines
        .by_ref()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .to_string();

    let chapter_number = numbering
        .number_in(&title)
        .or_else(|| numbering.number_in(stem))?;
    let content = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    Some(ChapterSource {
        chapter_number,
        title: Some(title),
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re() -> ChapterNumbering {
        ChapterNumbering::new().unwrap()
    }

    #[test]
    fn number_comes_from_title_first() {
        let chapter = parse_chapter(
            &re(),
            "0007",
            "\n\nChapter 12: The Gate\n\nArthur walked.\nHe stopped.\n",
        )
        .unwrap();
        assert_eq!(chapter.chapter_number, 12);
        assert_eq!(chapter.title.as_deref(), Some("Chapter 12: The Gate"));
        assert_eq!(chapter.content, "Arthur walked.\nHe stopped.");
    }

    #[test]
    fn chapter_label_beats_volume_number() {
        let chapter = parse_chapter(&re(), "v2c15", "Volume 2 Chapter 15 - Ashes
Smoke rose.").unwrap();
        assert_eq!(chapter.chapter_number, 15);

        let numbering = re();
        assert_eq!(numbering.number_in("Book 3, ch.7"), Some(7));
        assert_eq!(numbering.number_in("vol_01_chapter_0042"), Some(42));
        assert_eq!(numbering.number_in("Side Story 4"), Some(4));
        assert_eq!(numbering.number_in("March 12, Chapter 5"), Some(5));
    }

    #[test]
    fn falls_back_to_file_stem() {
        let chapter = parse_chapter(&re(), "chapter-031", "Prologue\nIt began.").unwrap();
        assert_eq!(chapter.chapter_number, 31);
        assert!(parse_chapter(&re(), "notes", "Prologue\nIt began.").is_none());
        assert!(parse_chapter(&re(), "12", "   \n\n").is_none());
    }

    #[test]
    fn reads_txt_files_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("002.txt"), "Chapter 2\nSecond.").unwrap();
        std::fs::write(dir.path().join("001.txt"), "Chapter 1\nFirst.").unwrap();
        std::fs::write(dir.path().join("readme.md"), "Chapter 9\nIgnored.").unwrap();
        std::fs::write(dir.path().join("extra.txt"), "Interlude\nNo number.").unwrap();

        let chapters = read_chapter_dir(dir.path()).unwrap();
        let numbers: Vec<i64> = chapters.iter().map(|c| c.chapter_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(chapters[0].content, "First.");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_chapter_dir(&dir.path().join("absent")).is_err());
    }
}
