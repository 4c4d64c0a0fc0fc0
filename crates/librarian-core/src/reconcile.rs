//! Filesystem reconciler: regex-driven clean/copy between a generated
//! "output" tree and the repository working tree.

use std::fs::Metadata;

use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use regex::Regex;
use walkdir::WalkDir;

use crate::state::{AllowlistEntry, LibrarianConfig, LibrarianState, Permission};

/// Compiles `patterns` as anchored regular expressions, failing on the
/// first invalid one.
fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid regex pattern '{p}'")))
        .collect()
}

/// All paths under `root`, relative to `root`, including directories and
/// `root` itself (represented as `.`). Symlinks are listed as entries but
/// never followed.
fn all_relative_paths(root: &Utf8Path) -> Result<Vec<String>> {
    let mut paths = vec![".".to_string()];
    for entry in WalkDir::new(root.as_std_path())
        .follow_links(false)
        .min_depth(1)
    {
        let entry = entry.with_context(|| format!("failed to walk {root}"))?;
        let relative = entry
            .path()
            .strip_prefix(root.as_std_path())
            .expect("walkdir entries are rooted at root")
            .to_string_lossy()
            .replace('\\', "/");
        paths.push(relative);
    }
    Ok(paths)
}

fn matches_any(path: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|re| re.is_match(path))
}

/// Deletes every path under `root` matched by `remove_patterns` unless it
/// is also matched by `preserve_patterns`. Files are deleted first, then
/// directories deepest-first, so a directory is only removed once it is
/// either empty or itself explicitly matched.
pub fn clean(root: &Utf8Path, remove_patterns: &[String], preserve_patterns: &[String]) -> Result<()> {
    let remove = compile(remove_patterns)?;
    let preserve = compile(preserve_patterns)?;

    let all_paths = all_relative_paths(root)?;
    let mut to_remove: Vec<String> = all_paths
        .into_iter()
        .filter(|p| matches_any(p, &remove) && !matches_any(p, &preserve))
        .collect();

    // Deepest first so directory removal happens after its contents.
    to_remove.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for relative in &to_remove {
        let full = root.join(relative);
        let meta = match full.as_std_path().symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to lstat {full}"));
            }
        };
        if is_dir_not_symlink(&meta) {
            dirs.push(full);
        } else {
            files.push(full);
        }
    }

    for file in files {
        fs_err::remove_file(&file).with_context(|| format!("failed to remove {file}"))?;
    }
    // dirs inherits the deepest-first ordering from `to_remove`. A
    // directory that matched remove but still holds preserved children is
    // left in place rather than forced empty.
    for dir in dirs {
        if !dir.as_std_path().exists() {
            continue;
        }
        match fs_err::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {}
            Err(e) => return Err(e).with_context(|| format!("failed to remove {dir}")),
        }
    }
    Ok(())
}

fn is_dir_not_symlink(meta: &Metadata) -> bool {
    meta.is_dir() && !meta.file_type().is_symlink()
}

/// Copies a file, creating parent directories in `dst` as needed. A
/// symlink on either side is a hard failure: the reconciler never
/// follows or overwrites through a symlink.
pub fn copy_file(dst: &Utf8Path, src: &Utf8Path) -> Result<()> {
    let src_meta = src
        .as_std_path()
        .symlink_metadata()
        .with_context(|| format!("failed to open file {src}"))?;
    if src_meta.file_type().is_symlink() {
        bail!("failed to copy file {src}: source is a symlink, which is not supported");
    }
    if let Ok(dst_meta) = dst.as_std_path().symlink_metadata() {
        if dst_meta.file_type().is_symlink() {
            bail!("failed to copy file {dst}: destination is a symlink, which is not supported");
        }
    }
    if let Some(parent) = dst.parent() {
        fs_err::create_dir_all(parent).with_context(|| format!("failed to make directory {parent}"))?;
    }
    let mut reader =
        fs_err::File::open(src).with_context(|| format!("failed to open file {src}"))?;
    let mut writer =
        fs_err::File::create(dst).with_context(|| format!("failed to create file {dst}"))?;
    std::io::copy(&mut reader, &mut writer)
        .with_context(|| format!("failed to copy file {src} to {dst}"))?;
    Ok(())
}

/// Recursively copies every file under `src/<root>` into `dst/<root>` for
/// each of `source_roots`. Existing files in `dst` are overwritten, unless
/// the existing entry is itself a symlink, which is a hard failure just
/// like a symlink anywhere under `src` — the reconciler never follows or
/// replaces a symlink on either side.
pub fn copy_library(dst: &Utf8Path, src: &Utf8Path, source_roots: &[String]) -> Result<()> {
    for root in source_roots {
        let src_root = src.join(root);
        if !src_root.as_std_path().exists() {
            continue;
        }
        for entry in WalkDir::new(src_root.as_std_path()).follow_links(false) {
            let entry = entry.with_context(|| format!("failed to walk {src_root}"))?;
            let meta = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            if meta.file_type().is_symlink() {
                bail!(
                    "failed to copy {}: symlinks under a library's source roots are not supported",
                    entry.path().display()
                );
            }
            if meta.is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(src.as_std_path())
                .expect("entry is rooted under src");
            let dst_path = dst.join(relative.to_string_lossy().replace('\\', "/"));
            let src_path = Utf8Path::from_path(entry.path())
                .with_context(|| format!("non-utf8 path {}", entry.path().display()))?;
            copy_file(&dst_path, src_path)?;
        }
    }
    Ok(())
}

/// Cleans and copies one library's files back into the repo, per
/// §4.4's `cleanAndCopyLibrary`.
pub fn clean_and_copy_library(state: &LibrarianState, repo_dir: &Utf8Path, library_id: &str, output_dir: &Utf8Path) -> Result<()> {
    let library = state
        .find_library_by_id(library_id)
        .with_context(|| format!("library '{library_id}' not found during clean and copy"))?;

    let remove_patterns = library.effective_remove_patterns();
    clean(repo_dir, &remove_patterns, &library.preserve_regex)
        .with_context(|| format!("failed to clean library '{library_id}'"))?;
    copy_library(repo_dir, output_dir, &library.source_roots)
        .with_context(|| format!("failed to copy library '{library_id}'"))?;
    Ok(())
}

/// Copies every allowlisted global file from `src` to `dst`. `read-only`
/// entries are only copied when `copy_read_only` is set (repo→container
/// direction); they are never copied back from the container.
pub fn copy_global_allowlist(cfg: &LibrarianConfig, dst: &Utf8Path, src: &Utf8Path, copy_read_only: bool) -> Result<()> {
    for entry in &cfg.global_files_allowlist {
        if entry.permissions == Permission::ReadOnly && !copy_read_only {
            continue;
        }
        copy_allowlisted_entry(dst, src, entry)?;
    }
    Ok(())
}

fn copy_allowlisted_entry(dst: &Utf8Path, src: &Utf8Path, entry: &AllowlistEntry) -> Result<()> {
    let src_path = src.join(&entry.path);
    let dst_path = dst.join(&entry.path);
    src_path
        .as_std_path()
        .symlink_metadata()
        .with_context(|| format!("failed to lstat global file '{}'", entry.path))?;
    copy_file(&dst_path, &src_path)
        .with_context(|| format!("failed to copy global file '{}'", entry.path))?;
    Ok(())
}

/// `shouldExclude`: true iff every changed file has some exclude path as
/// a prefix.
pub fn should_exclude(changed_files: &[String], exclude_paths: &[String]) -> bool {
    if changed_files.is_empty() {
        return false;
    }
    changed_files
        .iter()
        .all(|file| exclude_paths.iter().any(|prefix| has_path_prefix(file, prefix)))
}

fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &std::path::Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn clean_removes_matched_minus_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        write(&dir.path().join("foo/a.txt"), "a");
        write(&dir.path().join("foo/b.txt"), "b");
        write(&dir.path().join("bar/c.txt"), "c");

        clean(root, &["^foo/.*".to_string()], &[]).unwrap();

        let mut remaining = all_relative_paths(root).unwrap();
        remaining.sort();
        assert_eq!(remaining, vec![".".to_string(), "bar".to_string(), "bar/c.txt".to_string()]);
    }

    #[test]
    fn clean_respects_preserve() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        write(&dir.path().join("foo/a.txt"), "a");
        write(&dir.path().join("foo/keep.txt"), "keep");

        clean(root, &["^foo/.*".to_string()], &["^foo/keep.txt$".to_string()]).unwrap();

        assert!(dir.path().join("foo/keep.txt").exists());
        assert!(!dir.path().join("foo/a.txt").exists());
    }

    #[test]
    fn clean_rejects_invalid_regex() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert!(clean(root, &["(".to_string()], &[]).is_err());
    }

    #[test]
    fn copy_library_copies_source_roots() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        write(&src_dir.path().join("dir1/file1.txt"), "hello");

        let src = Utf8Path::from_path(src_dir.path()).unwrap();
        let dst = Utf8Path::from_path(dst_dir.path()).unwrap();
        copy_library(dst, src, &["dir1".to_string()]).unwrap();

        assert_eq!(
            fs::read_to_string(dst_dir.path().join("dir1/file1.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn copy_file_rejects_symlink_destination() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        write(&src_dir.path().join("a.txt"), "hello");
        let real = dst_dir.path().join("real.txt");
        fs::write(&real, "old").unwrap();
        let link = dst_dir.path().join("a.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let src = Utf8Path::from_path(src_dir.path()).unwrap().join("a.txt");
        let dst = Utf8Path::from_path(dst_dir.path()).unwrap().join("a.txt");
        assert!(copy_file(&dst, &src).is_err());
    }

    #[test]
    fn should_exclude_requires_every_file_excluded() {
        let files = vec!["a/b/c.go".to_string(), "d/e/f.go".to_string()];
        assert!(!should_exclude(&files, &["a/b".to_string()]));
        assert!(should_exclude(&files, &["a/b".to_string(), "d/e".to_string()]));
    }
}
