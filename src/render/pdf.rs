//! Post-render PDF editing with lopdf.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::standard_security::encrypt_document;
use super::{DocumentCanvas, Permission, RenderError, TextStamp};

const STAMP_FONT_RESOURCE: &str = "FStamp";
const DEFAULT_STAMP_FONT: &str = "Helvetica";

/// A compiled PDF held in memory while the pipeline embellishes it.
pub struct PdfCanvas {
    doc: Document,
    stamp_font: Option<ObjectId>,
    /// Set once strings and streams are encrypted; later edits would land in plaintext.
    encrypted: bool,
}

impl PdfCanvas {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RenderError> {
        Ok(Self {
            doc: Document::load_mem(bytes)?,
            stamp_font: None,
            encrypted: false,
        })
    }

    fn ensure_editable(&self) -> Result<(), RenderError> {
        if self.encrypted {
            return Err(RenderError::Unsupported("editing an encrypted document"));
        }
        Ok(())
    }

    fn page_id(&self, page: usize) -> Result<ObjectId, RenderError> {
        let pages = self.doc.get_pages();
        u32::try_from(page)
            .ok()
            .and_then(|number| pages.get(&number).copied())
            .ok_or(RenderError::PageOutOfRange {
                page,
                count: pages.len(),
            })
    }

    fn stamp_font(&mut self, base_font: &str) -> ObjectId {
        if let Some(id) = self.stamp_font {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font,
        });
        self.stamp_font = Some(id);
        id
    }

    /// Make `font_id` reachable as `/FStamp` from the page's resources.
    fn register_font(&mut self, page_id: ObjectId, font_id: ObjectId) -> Result<(), RenderError> {
        let resources = self.doc.get_or_create_resources(page_id)?.as_dict_mut()?;

        let shared_fonts = match resources.get_mut(b"Font") {
            Ok(Object::Dictionary(fonts)) => {
                fonts.set(STAMP_FONT_RESOURCE, font_id);
                None
            }
            Ok(Object::Reference(id)) => Some(*id),
            _ => {
                resources.set("Font", dictionary! { STAMP_FONT_RESOURCE => font_id });
                None
            }
        };

        if let Some(fonts_id) = shared_fonts {
            self.doc
                .get_object_mut(fonts_id)?
                .as_dict_mut()?
                .set(STAMP_FONT_RESOURCE, font_id);
        }
        Ok(())
    }
}

impl DocumentCanvas for PdfCanvas {
    fn attach_info_dictionary(&mut self, info: &BTreeMap<String, String>) -> Result<(), RenderError> {
        self.ensure_editable()?;
        let mut dict = Dictionary::new();
        for (key, value) in info {
            dict.set(key.as_str(), Object::string_literal(value.as_str()));
        }
        let info_id = self.doc.add_object(dict);
        self.doc.trailer.set("Info", info_id);
        Ok(())
    }

    fn attach_xmp_block(&mut self, xml: &str) -> Result<(), RenderError> {
        self.ensure_editable()?;
        let stream = Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            xml.as_bytes().to_vec(),
        )
        .with_compression(false);
        let metadata_id = self.doc.add_object(stream);

        let root_id = self.doc.trailer.get(b"Root")?.as_reference()?;
        self.doc
            .get_object_mut(root_id)?
            .as_dict_mut()?
            .set("Metadata", metadata_id);
        Ok(())
    }

    fn set_encryption(
        &mut self,
        open_password: Option<&str>,
        owner_password: &str,
        permissions: &[Permission],
        strength: u32,
    ) -> Result<(), RenderError> {
        self.ensure_editable()?;
        encrypt_document(
            &mut self.doc,
            open_password.unwrap_or(""),
            owner_password,
            permissions,
            strength,
        )?;
        self.encrypted = true;
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn draw_text(&mut self, page: usize, stamp: &TextStamp) -> Result<(), RenderError> {
        self.ensure_editable()?;
        let page_id = self.page_id(page)?;
        let font_id = self.stamp_font(stamp.font.as_deref().unwrap_or(DEFAULT_STAMP_FONT));
        self.register_font(page_id, font_id)?;

        let (sin, cos) = stamp.angle.to_radians().sin_cos();
        let [r, g, b] = stamp.color;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![STAMP_FONT_RESOURCE.into(), stamp.size.into()]),
                Operation::new("rg", vec![r.into(), g.into(), b.into()]),
                Operation::new(
                    "Tm",
                    vec![
                        cos.into(),
                        sin.into(),
                        (-sin).into(),
                        cos.into(),
                        stamp.x.into(),
                        stamp.y.into(),
                    ],
                ),
                Operation::new("Tj", vec![Object::string_literal(stamp.text.as_str())]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };

        self.doc.add_page_contents(page_id, content.encode()?)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>, RenderError> {
        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| RenderError::Serialize(e.to_string()))?;
        Ok(bytes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal single-page PDF.
    pub(crate) fn one_page_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![Operation::new("BT", vec![]), Operation::new("ET", vec![])],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn string_value(dict: &Dictionary, key: &[u8]) -> String {
        match dict.get(key).unwrap() {
            Object::String(bytes, _) => String::from_utf8_lossy(bytes).into_owned(),
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn test_metadata_and_stamp_survive_round_trip() {
        let mut canvas = Box::new(PdfCanvas::from_bytes(&one_page_pdf()).unwrap());
        assert_eq!(canvas.page_count(), 1);

        let info = BTreeMap::from([("Title".to_string(), "Bancozim Application - DRAFT".to_string())]);
        canvas.attach_info_dictionary(&info).unwrap();
        canvas.attach_xmp_block("<x:xmpmeta/>").unwrap();
        canvas
            .draw_text(
                1,
                &TextStamp {
                    x: 300.0,
                    y: 400.0,
                    text: "BANCOZIM - DRAFT - 2026-01-01".to_string(),
                    font: None,
                    size: 12.0,
                    color: [0.8, 0.8, 0.8],
                    angle: -45.0,
                },
            )
            .unwrap();

        let bytes = canvas.finish().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();

        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = doc.get_object(info_id).unwrap().as_dict().unwrap();
        assert_eq!(string_value(info, b"Title"), "Bancozim Application - DRAFT");

        let root_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        let catalog = doc.get_object(root_id).unwrap().as_dict().unwrap();
        assert!(catalog.get(b"Metadata").unwrap().as_reference().is_ok());

        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("BANCOZIM - DRAFT"));
    }

    fn stamp() -> TextStamp {
        TextStamp {
            x: 0.0,
            y: 0.0,
            text: "x".to_string(),
            font: None,
            size: 12.0,
            color: [0.0, 0.0, 0.0],
            angle: 0.0,
        }
    }

    #[test]
    fn test_out_of_range_page() {
        let mut canvas = PdfCanvas::from_bytes(&one_page_pdf()).unwrap();
        assert!(matches!(
            canvas.draw_text(2, &stamp()),
            Err(RenderError::PageOutOfRange { page: 2, count: 1 })
        ));
        assert!(PdfCanvas::from_bytes(b"not a pdf").is_err());
    }

    #[test]
    fn test_encrypted_document_reopens_with_empty_user_password() {
        let mut canvas = Box::new(PdfCanvas::from_bytes(&one_page_pdf()).unwrap());
        let info = BTreeMap::from([("Title".to_string(), "Bancozim Application - DRAFT".to_string())]);
        canvas.attach_info_dictionary(&info).unwrap();
        canvas
            .set_encryption(None, "Owner1234567ab01", &[Permission::Print, Permission::Copy], 128)
            .unwrap();

        let bytes = canvas.finish().unwrap();
        let mut doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.is_encrypted());

        let encrypt = doc.get_encrypted().unwrap();
        assert_eq!(encrypt.get(b"R").unwrap().as_i64().unwrap(), 3);
        assert_eq!(encrypt.get(b"Length").unwrap().as_i64().unwrap(), 128);
        assert_eq!(encrypt.get(b"P").unwrap().as_i64().unwrap(), -1324);

        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let sealed = string_value(doc.get_object(info_id).unwrap().as_dict().unwrap(), b"Title");
        assert_ne!(sealed, "Bancozim Application - DRAFT");

        doc.decrypt("").unwrap();
        assert!(!doc.is_encrypted());
        let title = string_value(doc.get_object(info_id).unwrap().as_dict().unwrap(), b"Title");
        assert_eq!(title, "Bancozim Application - DRAFT");
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_encrypted_canvas_rejects_further_edits() {
        let mut canvas = PdfCanvas::from_bytes(&one_page_pdf()).unwrap();
        canvas
            .set_encryption(None, "owner", &[Permission::Print], 128)
            .unwrap();
        assert!(matches!(
            canvas.draw_text(1, &stamp()),
            Err(RenderError::Unsupported(_))
        ));
        assert!(matches!(
            canvas.set_encryption(None, "owner", &[Permission::Print], 128),
            Err(RenderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_only_128_bit_strength_is_offered() {
        let mut canvas = PdfCanvas::from_bytes(&one_page_pdf()).unwrap();
        assert!(matches!(
            canvas.set_encryption(None, "owner", &[Permission::Print], 40),
            Err(RenderError::Unsupported(_))
        ));
    }
}
