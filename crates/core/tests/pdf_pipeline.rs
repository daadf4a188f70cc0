use docchat_core::{
    split_markdown, CharacterNgramEmbedder, ChatMessage, ChunkingConfig, ConversionError,
    Document, DocumentIngestor, GenerationError, LanguageModel, Pipeline, QuestionOutcome,
    Session, SessionError, UploadOutcome,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::sync::{Arc, Mutex};

/// Builds a one-page pdf with each entry of `lines` in its own text object.
fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut operations = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
        operations.push(Operation::new(
            "Td",
            vec![72.into(), (720 - 20 * index as i64).into()],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("ET", vec![]));
    }

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("content encodes"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf serializes");
    bytes
}

struct EchoContextModel {
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait::async_trait]
impl LanguageModel for EchoContextModel {
    fn model_name(&self) -> &str {
        "echo-context"
    }

    /// Answers with the retrieved context, which is what a grounded model
    /// would paraphrase.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        let context = messages
            .first()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(context)
    }
}

#[test]
fn lopdf_conversion_produces_markdown() {
    let bytes = pdf_with_lines(&["1 Results", "Revenue grew 12% in Q1.", "2 Staff", "Headcount was flat."]);

    let text = DocumentIngestor::default()
        .convert(&Document::new("sample.pdf", bytes))
        .expect("generated pdf converts");

    assert_eq!(text.source.name, "sample.pdf");
    assert_eq!(text.source.converter, "lopdf");
    assert!(text.text.contains("Revenue grew 12% in Q1."));
    assert!(text.text.contains("# 1 Results"));

    let segments = split_markdown(&text, ChunkingConfig::default());
    let rebuilt: String = segments.iter().map(|segment| segment.text.as_str()).collect();
    assert_eq!(rebuilt, text.text);
    assert_eq!(segments.len(), 2);
}

#[tokio::test]
async fn upload_and_ask_over_a_real_pdf() {
    let model = Arc::new(EchoContextModel {
        prompts: Mutex::new(Vec::new()),
    });
    let pipeline = Arc::new(Pipeline::new(
        DocumentIngestor::default(),
        Arc::new(CharacterNgramEmbedder::default()),
        model.clone(),
    ));
    let mut session = Session::new(pipeline);

    let bytes = pdf_with_lines(&["1 Results", "Revenue grew 12% in Q1.", "2 Staff", "Headcount was flat."]);
    let upload = session
        .on_upload(Document::new("sample.pdf", bytes))
        .await
        .expect("upload succeeds");
    assert!(matches!(upload, UploadOutcome::Indexed { segments: 2, .. }));

    let outcome = session
        .on_question("What happened to revenue in Q1?")
        .await
        .expect("question succeeds");

    let QuestionOutcome::Answered(turn) = outcome else {
        panic!("expected an answer");
    };
    assert!(turn.answer.contains("12%"));
    assert_eq!(session.history().len(), 1);
    assert_eq!(model.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn zero_byte_upload_creates_no_engine() {
    let pipeline = Arc::new(Pipeline::new(
        DocumentIngestor::default(),
        Arc::new(CharacterNgramEmbedder::default()),
        Arc::new(EchoContextModel {
            prompts: Mutex::new(Vec::new()),
        }),
    ));
    let mut session = Session::new(pipeline);

    let error = session
        .on_upload(Document::new("sample.pdf", Vec::new()))
        .await
        .expect_err("empty upload fails");

    assert!(matches!(error, SessionError::Conversion(ConversionError::Empty(_))));
    assert!(!session.has_document());
    assert!(matches!(
        session.on_question("anything?").await.unwrap(),
        QuestionOutcome::NoDocument
    ));
}
