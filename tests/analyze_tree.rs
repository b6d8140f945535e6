use std::fs;
use std::path::Path;
use tempfile::TempDir;

use tree_publish::analyze::{analyze, content_hash, ClassificationRule, Classifier};
use tree_publish::contract::TreeSource;
use tree_publish::model::Category;
use tree_publish::source::FsTreeSource;

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn sample_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(root, "index.html", b"<html></html>");
    write_file(root, "README.md", b"# site");
    write_file(root, "src/app.js", b"console.log('hi');");
    write_file(root, "src/lib/util.js", b"export {}");
    write_file(root, "config/site.yaml", b"title: x");
    write_file(root, "img/logo.png", &[0u8; 64]);
    write_file(root, ".git/HEAD", b"ref: refs/heads/main");
    write_file(root, "node_modules/pkg/index.js", b"module.exports = 1");
    write_file(root, "dist/bundle.js", b"bundled");
    dir
}

#[test]
fn analyze_classifies_hashes_and_summarizes_a_real_tree() {
    let dir = sample_tree();
    let source = FsTreeSource::new(dir.path()).with_excludes(["dist"]);

    let analysis = analyze(&source, &Classifier::default()).expect("analysis");

    let paths: Vec<&str> = analysis.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "README.md",
            "config/site.yaml",
            "img/logo.png",
            "index.html",
            "src/app.js",
            "src/lib/util.js",
        ]
    );
    let category = |p: &str| {
        analysis
            .entries
            .iter()
            .find(|e| e.path == p)
            .map(|e| e.category)
            .unwrap()
    };
    assert_eq!(category("index.html"), Category::RootCritical);
    assert_eq!(category("config/site.yaml"), Category::Config);
    assert_eq!(category("img/logo.png"), Category::Asset);
    assert_eq!(category("src/lib/util.js"), Category::Module);

    let readme = analysis.entries.iter().find(|e| e.path == "README.md").unwrap();
    assert_eq!(readme.content_hash, content_hash(b"# site"));
    assert_eq!(readme.size_bytes, 6);

    assert_eq!(analysis.total_files, 6);
    assert_eq!(analysis.summary[&Category::Module].count, 2);
    assert_eq!(analysis.summary[&Category::Asset].total_bytes, 64);
    let summed: u64 = analysis.summary.values().map(|s| s.total_bytes).sum();
    assert_eq!(summed, analysis.total_bytes);
}

#[test]
fn custom_rules_replace_the_defaults() {
    let dir = sample_tree();
    let source = FsTreeSource::new(dir.path()).with_excludes(["dist"]);
    let classifier = Classifier::from_rules(&[ClassificationRule::new(r"\.js$", Category::Asset)]).unwrap();

    let analysis = analyze(&source, &classifier).unwrap();

    assert!(analysis
        .entries
        .iter()
        .filter(|e| e.path.ends_with(".js"))
        .all(|e| e.category == Category::Asset));
    assert_eq!(
        analysis.entries.iter().find(|e| e.path == "index.html").unwrap().category,
        Category::Module
    );
}

#[test]
fn source_reads_back_listed_files_only() {
    let dir = sample_tree();
    let source = FsTreeSource::new(dir.path());

    assert_eq!(source.read("src/app.js").unwrap(), b"console.log('hi');");
    assert!(source.read("../etc/passwd").is_err());
    assert!(source.read("/etc/passwd").is_err());
}

#[test]
fn missing_root_fails_the_whole_scan() {
    let dir = TempDir::new().unwrap();
    let source = FsTreeSource::new(dir.path().join("does-not-exist"));

    assert!(analyze(&source, &Classifier::default()).is_err());
}
