#![cfg(not(tarpaulin_include))]

use std::error::Error;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use image::GenericImageView;
use lazy_static::lazy_static;
use regex::Regex;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

lazy_static! {
    static ref W_T_NODE: Regex = Regex::new(r"(?s)<w:t((?:\s[^>]*)?)>(.*?)</w:t>").unwrap();
    static ref TAG_PATTERN: Regex = Regex::new(r"\$\{([^}]*)\}").unwrap();
    static ref REL_ID: Regex = Regex::new(r#"Id="rId(\d+)""#).unwrap();
    static ref MEDIA_IMAGE: Regex = Regex::new(r"word/media/image(\d+)\.").unwrap();
}

/// Embedded charts render 5.5 inches wide; height follows the PNG aspect
const CHART_WIDTH_EMU: i64 = 5_029_200;

const DOCUMENT_PART: &str = "word/document.xml";
const SETTINGS_PART: &str = "word/settings.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const SETTINGS_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/settings";

const EMPTY_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
    <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
    </Relationships>";

/// A Word template held in memory as its OOXML parts
///
/// The archive is unpacked once; text replacement and chart insertion
/// rewrite `word/document.xml` directly, and `save` packs everything back
/// into a valid docx. Parts keep their original order.
#[derive(Debug)]
pub struct DocxTemplate {
    parts: Vec<(String, Vec<u8>)>,
    document_xml: String,
    next_drawing_id: usize,
}

impl DocxTemplate {
    /// Open a docx file and unpack its parts
    ///
    /// # Arguments
    /// * `path` - Path to the template file
    ///
    /// # Returns
    /// * `Result<DocxTemplate, Box<dyn Error>>` - The template, or an error
    ///   when the file is not a docx or has no document part
    ///
    /// # Examples
    /// ```no_run
    /// use reportgen::docfill::DocxTemplate;
    ///
    /// let template = DocxTemplate::open("template.docx").unwrap();
    /// println!("Tags found: {:?}", template.placeholder_tags());
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<DocxTemplate, Box<dyn Error>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            parts.push((entry.name().to_string(), bytes));
        }

        let document_xml = match parts.iter().find(|(name, _)| name == DOCUMENT_PART) {
            Some((_, bytes)) => String::from_utf8(bytes.clone())?,
            None => return Err("Template has no word/document.xml part".into()),
        };

        Ok(DocxTemplate {
            parts,
            document_xml,
            next_drawing_id: 1000,
        })
    }

    /// All `${tag}` placeholders in the document text, lowercased
    ///
    /// Only tags wholly inside one text run are found; Word splits runs on
    /// formatting changes, so a tag must not change style mid-way.
    ///
    /// # Returns
    /// * `Vec<String>` - Tags in document order, deduplicated
    pub fn placeholder_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for node in W_T_NODE.captures_iter(&self.document_xml) {
            for tag in TAG_PATTERN.captures_iter(&node[2]) {
                let key = tag[1].trim().to_lowercase();
                if !key.is_empty() && !tags.contains(&key) {
                    tags.push(key);
                }
            }
        }
        tags
    }

    /// Replace every `${tag}` occurrence with a text value
    ///
    /// Matching is case-insensitive. The value is XML-escaped before it is
    /// written into the document.
    ///
    /// # Arguments
    /// * `tag` - Placeholder name, without the `${}` wrapper
    /// * `value` - Replacement text
    ///
    /// # Returns
    /// * `usize` - How many occurrences were replaced
    pub fn replace_text(&mut self, tag: &str, value: &str) -> usize {
        let tag_re = match tag_regex(tag) {
            Ok(re) => re,
            Err(_) => return 0,
        };
        let escaped = xml_escape(value);

        let mut count = 0;
        let document = self.document_xml.clone();
        let rebuilt = W_T_NODE.replace_all(&document, |caps: &regex::Captures| {
            let attrs = &caps[1];
            let text = &caps[2];
            let matches = tag_re.find_iter(text).count();
            if matches == 0 {
                return caps[0].to_string();
            }
            count += matches;
            let replaced = tag_re.replace_all(text, escaped.as_str());
            format!("<w:t{}>{}</w:t>", attrs, replaced)
        });
        self.document_xml = rebuilt.into_owned();
        count
    }

    /// Replace a `${tag}` placeholder with an embedded PNG chart
    ///
    /// The placeholder text is removed and a drawing run is spliced in
    /// after the run that held it. The PNG lands in `word/media/`, with the
    /// relationship and content type registered.
    ///
    /// # Arguments
    /// * `tag` - Placeholder name, without the `${}` wrapper
    /// * `png_bytes` - Rendered chart image
    ///
    /// # Returns
    /// * `Result<bool, Box<dyn Error>>` - false when the tag does not occur
    ///   in the document, an error when the PNG or the archive is unusable
    pub fn insert_chart(&mut self, tag: &str, png_bytes: &[u8]) -> Result<bool, Box<dyn Error>> {
        let tag_re = tag_regex(tag)?;

        let node = W_T_NODE
            .captures_iter(&self.document_xml)
            .find(|caps| tag_re.is_match(&caps[2]));
        let caps = match node {
            Some(caps) => caps,
            None => return Ok(false),
        };

        let whole = caps.get(0).ok_or("placeholder node vanished")?;
        let node_start = whole.start();
        let node_end = whole.end();
        let attrs = caps[1].to_string();
        let text = caps[2].to_string();

        // Splice after the run enclosing the placeholder
        let run_close = "</w:r>";
        let run_end = match self.document_xml[node_end..].find(run_close) {
            Some(pos) => node_end + pos + run_close.len(),
            None => return Ok(false),
        };

        let image = image::load_from_memory(png_bytes)
            .map_err(|e| format!("Embedded chart image is unreadable: {}", e))?;
        let (px_w, px_h) = image.dimensions();
        let cx = CHART_WIDTH_EMU;
        let cy = if px_w > 0 {
            CHART_WIDTH_EMU * px_h as i64 / px_w as i64
        } else {
            CHART_WIDTH_EMU * 3 / 5
        };

        let media_name = self.next_media_name();
        let rid = self.add_relationship(IMAGE_REL_TYPE, &format!("media/{}", media_name));
        self.ensure_png_content_type();
        self.parts
            .push((format!("word/media/{}", media_name), png_bytes.to_vec()));

        let drawing_id = self.next_drawing_id;
        self.next_drawing_id += 1;
        let drawing_run = build_drawing_run(drawing_id, &rid, &media_name, cx, cy);

        let emptied = tag_re.replace_all(&text, "");
        let rebuilt_node = format!("<w:t{}>{}</w:t>", attrs, emptied);

        let mut new_document =
            String::with_capacity(self.document_xml.len() + drawing_run.len() + 64);
        new_document.push_str(&self.document_xml[..node_start]);
        new_document.push_str(&rebuilt_node);
        new_document.push_str(&self.document_xml[node_end..run_end]);
        new_document.push_str(&drawing_run);
        new_document.push_str(&self.document_xml[run_end..]);
        self.document_xml = new_document;

        Ok(true)
    }

    /// Mark every field for recalculation on open
    ///
    /// Word then refreshes tables of contents against the filled document
    /// the first time the report is opened.
    pub fn enable_field_refresh(&mut self) {
        let update_fields = "<w:updateFields w:val=\"true\"/>";

        if let Some(existing) = self.part_string(SETTINGS_PART) {
            if existing.contains("<w:updateFields") {
                return;
            }
            if let Some(root) = existing.find("<w:settings") {
                if let Some(close) = existing[root..].find('>') {
                    let at = root + close + 1;
                    let mut patched = String::with_capacity(existing.len() + update_fields.len());
                    patched.push_str(&existing[..at]);
                    patched.push_str(update_fields);
                    patched.push_str(&existing[at..]);
                    self.set_part(SETTINGS_PART, patched.into_bytes());
                }
            }
            return;
        }

        let settings = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <w:settings xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             {}</w:settings>",
            update_fields
        );
        self.parts
            .push((SETTINGS_PART.to_string(), settings.into_bytes()));
        self.add_relationship(SETTINGS_REL_TYPE, "settings.xml");
        self.ensure_content_type_override(
            "/word/settings.xml",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.settings+xml",
        );
    }

    /// Pack the filled template back into a docx file
    ///
    /// # Arguments
    /// * `path` - Destination path, overwritten if present
    ///
    /// # Returns
    /// * `Result<(), Box<dyn Error>>` - Success or the underlying IO error
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let file = File::create(path)?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        for (name, bytes) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            if name == DOCUMENT_PART {
                writer.write_all(self.document_xml.as_bytes())?;
            } else {
                writer.write_all(bytes)?;
            }
        }

        writer.finish()?;
        Ok(())
    }

    fn part_string(&self, name: &str) -> Option<String> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .and_then(|(_, bytes)| String::from_utf8(bytes.clone()).ok())
    }

    fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = bytes,
            None => self.parts.push((name.to_string(), bytes)),
        }
    }

    fn next_media_name(&self) -> String {
        let mut max = 0u32;
        for (name, _) in &self.parts {
            if let Some(caps) = MEDIA_IMAGE.captures(name) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    max = max.max(n);
                }
            }
        }
        format!("image{}.png", max + 1)
    }

    /// Register a relationship on the document part, returning its rId
    fn add_relationship(&mut self, rel_type: &str, target: &str) -> String {
        let rels = self
            .part_string(DOCUMENT_RELS_PART)
            .unwrap_or_else(|| EMPTY_RELS.to_string());

        let mut max = 0u32;
        for caps in REL_ID.captures_iter(&rels) {
            if let Ok(n) = caps[1].parse::<u32>() {
                max = max.max(n);
            }
        }
        let rid = format!("rId{}", max + 1);

        let entry = format!(
            "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"/>",
            rid, rel_type, target
        );
        let patched = match rels.rfind("</Relationships>") {
            Some(at) => {
                let mut s = String::with_capacity(rels.len() + entry.len());
                s.push_str(&rels[..at]);
                s.push_str(&entry);
                s.push_str(&rels[at..]);
                s
            }
            None => format!("{}{}", rels, entry),
        };

        self.set_part(DOCUMENT_RELS_PART, patched.into_bytes());
        rid
    }

    fn ensure_png_content_type(&mut self) {
        let types = match self.part_string(CONTENT_TYPES_PART) {
            Some(t) => t,
            None => return,
        };
        if types.contains("Extension=\"png\"") {
            return;
        }
        if let Some(at) = types.rfind("</Types>") {
            let entry = "<Default Extension=\"png\" ContentType=\"image/png\"/>";
            let mut patched = String::with_capacity(types.len() + entry.len());
            patched.push_str(&types[..at]);
            patched.push_str(entry);
            patched.push_str(&types[at..]);
            self.set_part(CONTENT_TYPES_PART, patched.into_bytes());
        }
    }

    fn ensure_content_type_override(&mut self, part_name: &str, content_type: &str) {
        let types = match self.part_string(CONTENT_TYPES_PART) {
            Some(t) => t,
            None => return,
        };
        if types.contains(&format!("PartName=\"{}\"", part_name)) {
            return;
        }
        if let Some(at) = types.rfind("</Types>") {
            let entry = format!(
                "<Override PartName=\"{}\" ContentType=\"{}\"/>",
                part_name, content_type
            );
            let mut patched = String::with_capacity(types.len() + entry.len());
            patched.push_str(&types[..at]);
            patched.push_str(&entry);
            patched.push_str(&types[at..]);
            self.set_part(CONTENT_TYPES_PART, patched.into_bytes());
        }
    }
}

fn tag_regex(tag: &str) -> Result<Regex, Box<dyn Error>> {
    Ok(Regex::new(&format!(
        r"(?i)\$\{{{}\}}",
        regex::escape(tag)
    ))?)
}

/// Escape text for insertion into an XML text node
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn build_drawing_run(drawing_id: usize, rid: &str, media_name: &str, cx: i64, cy: i64) -> String {
    format!(
        "<w:r><w:drawing>\
         <wp:inline distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\" \
         xmlns:wp=\"http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing\" \
         xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
         xmlns:pic=\"http://schemas.openxmlformats.org/drawingml/2006/picture\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <wp:extent cx=\"{cx}\" cy=\"{cy}\"/>\
         <wp:effectExtent l=\"0\" t=\"0\" r=\"0\" b=\"0\"/>\
         <wp:docPr id=\"{id}\" name=\"Chart {id}\"/>\
         <wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect=\"1\"/></wp:cNvGraphicFramePr>\
         <a:graphic><a:graphicData uri=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">\
         <pic:pic>\
         <pic:nvPicPr><pic:cNvPr id=\"{id}\" name=\"{name}\"/><pic:cNvPicPr/></pic:nvPicPr>\
         <pic:blipFill><a:blip r:embed=\"{rid}\"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>\
         <pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>\
         <a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>\
         </pic:pic>\
         </a:graphicData></a:graphic>\
         </wp:inline></w:drawing></w:r>",
        id = drawing_id,
        rid = rid,
        name = media_name,
        cx = cx,
        cy = cy
    )
}
