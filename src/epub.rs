use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use zip::write::SimpleFileOptions;

use crate::package::ChapterContent;

pub const PACKAGE_DOCUMENT_PATH: &str = "OEBPS/content.opf";
pub const NCX_PATH: &str = "OEBPS/toc.ncx";
const LANG: &str = "en";

#[derive(Debug)]
pub struct EpubBook<'a> {
    /// Full identifier, e.g. `urn:uuid:...`.
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub chapters: &'a [ChapterContent],
}

pub fn chapter_href(position: usize) -> String {
    format!("Text/chapter{position}.xhtml")
}

pub fn write_epub(out_path: &Path, book: &EpubBook<'_>) -> anyhow::Result<()> {
    let out_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_path)
        .with_context(|| format!("open epub output: {}", out_path.display()))?;

    let mut zip = zip::ZipWriter::new(out_file);

    // `mimetype` must come first and must be stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(b"application/epub+zip")
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    zip.start_file("META-INF/container.xml", deflated_options)
        .context("epub start_file container.xml")?;
    zip.write_all(render_container_xml().as_bytes())
        .context("epub write container.xml")?;

    zip.start_file(PACKAGE_DOCUMENT_PATH, deflated_options)
        .context("epub start_file content.opf")?;
    zip.write_all(render_content_opf(book).as_bytes())
        .context("epub write content.opf")?;

    zip.start_file(NCX_PATH, deflated_options)
        .context("epub start_file toc.ncx")?;
    zip.write_all(render_toc_ncx(book).as_bytes())
        .context("epub write toc.ncx")?;

    for (idx, chapter) in book.chapters.iter().enumerate() {
        let position = idx + 1;
        let xhtml = render_chapter_xhtml(&chapter_title(chapter, position), &chapter.text);
        zip.start_file(format!("OEBPS/{}", chapter_href(position)), deflated_options)
            .with_context(|| format!("epub start_file chapter {position}"))?;
        zip.write_all(xhtml.as_bytes())
            .with_context(|| format!("epub write chapter {position}"))?;
    }

    zip.finish().context("epub finish zip")?;
    Ok(())
}

fn chapter_title(chapter: &ChapterContent, position: usize) -> String {
    let title = chapter.title.trim();
    if title.is_empty() {
        format!("Chapter {position}")
    } else {
        title.to_owned()
    }
}

fn book_title(book: &EpubBook<'_>) -> String {
    let title = book.title.trim();
    if title.is_empty() {
        "Untitled".to_owned()
    } else {
        title.to_owned()
    }
}

fn render_container_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{PACKAGE_DOCUMENT_PATH}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    )
}

fn render_content_opf(book: &EpubBook<'_>) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"BookId\" version=\"2.0\">\n",
    );
    out.push_str(
        "  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n",
    );
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&book_title(book))
    ));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(&book.author)
    ));
    out.push_str(&format!(
        "    <dc:description>{}</dc:description>\n",
        xml_escape(&book.description)
    ));
    out.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        xml_escape(&book.identifier)
    ));
    out.push_str(&format!("    <dc:language>{LANG}</dc:language>\n"));
    out.push_str("  </metadata>\n");

    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    for position in 1..=book.chapters.len() {
        out.push_str(&format!(
            "    <item id=\"chap{position}\" href=\"{}\" media-type=\"application/xhtml+xml\" />\n",
            chapter_href(position)
        ));
    }
    out.push_str("  </manifest>\n");

    out.push_str("  <spine toc=\"ncx\">\n");
    for position in 1..=book.chapters.len() {
        out.push_str(&format!("    <itemref idref=\"chap{position}\" />\n"));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn render_toc_ncx(book: &EpubBook<'_>) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\" />\n",
        xml_escape(&book.identifier)
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(&book_title(book)));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    for (idx, chapter) in book.chapters.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&chapter_title(chapter, play)));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!("      <content src=\"{}\" />\n", chapter_href(play)));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

/// One `<p>` per non-empty line of `text`.
fn render_chapter_xhtml(title: &str, text: &str) -> String {
    let title = xml_escape(title);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{LANG}\" xml:lang=\"{LANG}\">\n"
    ));
    out.push_str(&format!("<head><title>{title}</title></head>\n"));
    out.push_str("<body>\n");
    out.push_str(&format!("<h1>{title}</h1>\n"));
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        out.push_str(&format!("<p>{}</p>\n", xml_escape(line)));
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

/// Escapes markup characters and drops code points XML 1.0 cannot carry.
fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}
