#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use paperweave::config::{parse_config, Config};
use tempfile::TempDir;

/// A one-page paper: large title, author line, abstract.
pub fn paper_pdf(title: &str, authors: &str, abstract_text: &str) -> Vec<u8> {
    build_pdf(&[
        (18, title),
        (11, authors),
        (10, "Abstract"),
        (10, abstract_text),
    ])
}

/// Single-page PDF whose lines are `(font size, text)` pairs.
pub fn build_pdf(lines: &[(i64, &str)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut ops = vec![Operation::new("BT", vec![])];
    let mut y = 750;
    for (size, text) in lines {
        ops.push(Operation::new("Tf", vec!["F1".into(), (*size).into()]));
        ops.push(Operation::new(
            "Tm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), 72.into(), y.into()],
        ));
        ops.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
        y -= 30;
    }
    ops.push(Operation::new("ET", vec![]));
    let content = Content { operations: ops };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

pub struct TestLibrary {
    pub dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl TestLibrary {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        Self { dir, input, output }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Config text with the given provider and extra TOML appended.
    pub fn config_text(&self, provider: &str, extra: &str) -> String {
        let root = self.root().display();
        format!(
            r#"
[db]
path = "{root}/data/pw.sqlite"

[library]
input_dir = "{root}/in"
output_dir = "{root}/out"

[classifier]
provider = "{provider}"
api_key = "test-key"
max_attempts = 2
backoff_base_ms = 1
taxonomy = ["Computer Science/Machine Learning", "Biology"]
{extra}
"#
        )
    }

    pub fn config(&self, provider: &str) -> Config {
        parse_config(&self.config_text(provider, "")).unwrap()
    }

    pub fn add_paper(&self, name: &str, title: &str, authors: &str) -> PathBuf {
        let path = self.input.join(format!("{}.pdf", name));
        fs::write(
            &path,
            paper_pdf(title, authors, &format!("We study {}.", title.to_lowercase())),
        )
        .unwrap();
        path
    }

    pub fn archived(&self, subject: &str, title: &str) -> PathBuf {
        let mut path = self.output.clone();
        for segment in subject.split('/') {
            path.push(segment);
        }
        path.push(format!("{}.pdf", title));
        path
    }
}
