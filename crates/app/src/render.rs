//! Server-side HTML for the single chat page.

use crate::state::{Notice, NoticeKind};
use docchat_core::ConversationTurn;
use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{html, Event, Options, Parser};
use std::fmt::Write;

pub const TAB_TITLE: &str = "Document Chat Assistant";
pub const HEADING: &str = "Interactive Document Chat Assistant";
pub const PLACEHOLDER: &str = "Please upload a PDF document to start the conversation.";
pub const UPLOAD_BUSY: &str = "Processing your document...";
pub const ASK_BUSY: &str = "Thinking...";

pub struct PageView<'a> {
    pub document_name: Option<&'a str>,
    pub history: &'a [ConversationTurn],
    pub notice: Option<&'a Notice>,
}

pub fn render_page(view: &PageView<'_>) -> String {
    let mut page = String::with_capacity(4096);
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<main>\n\
         <h1>{}</h1>\n",
        encode_text(TAB_TITLE),
        encode_text(HEADING),
    );

    if let Some(notice) = view.notice {
        page.push_str(&render_notice(notice));
    }

    page.push_str(&render_upload_form(view.document_name));

    match view.document_name {
        None => {
            let _ = write!(
                page,
                "<p class=\"placeholder\">{}</p>\n",
                encode_text(PLACEHOLDER)
            );
        }
        Some(_) => {
            page.push_str(&render_transcript(view.history));
            page.push_str(&render_question_form());
        }
    }

    let _ = write!(page, "</main>\n<script>{SCRIPT}</script>\n</body>\n</html>\n");
    page
}

fn render_notice(notice: &Notice) -> String {
    let class = match notice.kind {
        NoticeKind::Info => "notice info",
        NoticeKind::Success => "notice success",
        NoticeKind::Error => "notice error",
    };
    format!(
        "<div class=\"{class}\" role=\"alert\">{}</div>\n",
        encode_text(&notice.message)
    )
}

fn render_upload_form(document_name: Option<&str>) -> String {
    let status = match document_name {
        Some(name) => format!(
            "<p class=\"loaded\">Loaded document: <strong>{}</strong></p>\n",
            encode_text(name)
        ),
        None => String::new(),
    };
    format!(
        "<section class=\"upload\">\n{status}\
         <form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\" \
         data-busy=\"{busy}\">\n\
         <input type=\"file\" name=\"file\" accept=\"application/pdf,.pdf\" required>\n\
         <button type=\"submit\">Upload</button>\n\
         <span class=\"busy\" hidden></span>\n</form>\n</section>\n",
        busy = encode_double_quoted_attribute(UPLOAD_BUSY),
    )
}

fn render_question_form() -> String {
    format!(
        "<h3>Engage in a conversation about your document</h3>\n\
         <form method=\"post\" action=\"/ask\" class=\"ask\" data-busy=\"{busy}\">\n\
         <label for=\"question\">Your question:</label>\n\
         <input type=\"text\" id=\"question\" name=\"question\" \
         placeholder=\"Type your question here and press Enter\" \
         autocomplete=\"off\" autofocus required>\n\
         <button type=\"submit\">Send</button>\n\
         <span class=\"busy\" hidden></span>\n</form>\n",
        busy = encode_double_quoted_attribute(ASK_BUSY),
    )
}

fn render_transcript(history: &[ConversationTurn]) -> String {
    let mut out = String::from("<section class=\"transcript\">\n");
    for turn in history {
        let _ = write!(
            out,
            "<div class=\"turn\">\n<p class=\"you\"><strong>You:</strong> {}</p>\n\
             <div class=\"bot\"><strong>Bot:</strong>\n{}</div>\n</div>\n",
            encode_text(&turn.question),
            markdown_to_html(&turn.answer),
        );
    }
    out.push_str("</section>\n");
    out
}

/// Renders model output as markdown. Raw html in the answer is shown as
/// text rather than passed through.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

const STYLE: &str = "\
body{font-family:system-ui,sans-serif;margin:0;background:#f6f7f9;color:#1d1f23}\
main{max-width:760px;margin:0 auto;padding:24px}\
form{display:flex;gap:8px;align-items:center;margin:12px 0}\
input[type=text]{flex:1;padding:8px}\
.notice{padding:10px 14px;border-radius:6px;margin:12px 0}\
.notice.error{background:#fde8e8;color:#8a1c1c}\
.notice.info{background:#e8f0fd;color:#1c3d8a}\
.notice.success{background:#e6f6ea;color:#1d5f2e}\
.placeholder{color:#555;font-style:italic}\
.turn{background:#fff;border-radius:8px;padding:10px 14px;margin:10px 0}\
.busy{color:#555}";

const SCRIPT: &str = "\
document.querySelectorAll('form[data-busy]').forEach(function(form){\
form.addEventListener('submit',function(){\
var busy=form.querySelector('.busy');\
busy.textContent=form.dataset.busy;busy.hidden=false;\
form.querySelectorAll('button').forEach(function(b){b.disabled=true;});\
});});";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(question: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: Utc::now(),
            source_ids: Vec::new(),
        }
    }

    #[test]
    fn placeholder_is_shown_without_document() {
        let page = render_page(&PageView {
            document_name: None,
            history: &[],
            notice: None,
        });

        assert!(page.contains(PLACEHOLDER));
        assert!(page.contains("action=\"/upload\""));
        assert!(!page.contains("action=\"/ask\""));
    }

    #[test]
    fn page_carries_titles_and_question_prompt() {
        let page = render_page(&PageView {
            document_name: Some("report.pdf"),
            history: &[],
            notice: None,
        });

        assert!(page.contains("<title>Document Chat Assistant</title>"));
        assert!(page.contains("<h1>Interactive Document Chat Assistant</h1>"));
        assert!(page.contains("<h3>Engage in a conversation about your document</h3>"));
        assert!(page.contains("<label for=\"question\">Your question:</label>"));
        assert!(page.contains("placeholder=\"Type your question here and press Enter\""));
    }

    #[test]
    fn transcript_keeps_turn_order() {
        let history = vec![turn("first?", "one"), turn("second?", "two")];
        let page = render_page(&PageView {
            document_name: Some("report.pdf"),
            history: &history,
            notice: None,
        });

        let first = page.find("first?").unwrap();
        let second = page.find("second?").unwrap();
        assert!(first < second);
        assert!(page.contains("<strong>You:</strong>"));
        assert!(page.contains("<strong>Bot:</strong>"));
        assert!(page.contains("report.pdf"));
        assert!(!page.contains(PLACEHOLDER));
    }

    #[test]
    fn user_text_is_escaped() {
        let history = vec![turn("<script>alert(1)</script>", "fine")];
        let notice = Notice::error("bad <b>input</b>");
        let page = render_page(&PageView {
            document_name: Some("a&b.pdf"),
            history: &history,
            notice: Some(&notice),
        });

        assert!(!page.contains("<script>alert(1)</script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("a&amp;b.pdf"));
        assert!(page.contains("bad &lt;b&gt;input&lt;/b&gt;"));
        assert!(page.contains("notice error"));
    }

    #[test]
    fn answers_render_as_markdown() {
        let html = markdown_to_html("Revenue grew **12%**.\n\n- Q1\n- Q2");
        assert!(html.contains("<strong>12%</strong>"));
        assert!(html.contains("<li>Q1</li>"));
    }

    #[test]
    fn raw_html_in_answers_is_not_passed_through() {
        let html = markdown_to_html("hello <img src=x onerror=alert(1)> there");
        assert!(!html.contains("<img"));
        assert!(html.contains("&lt;img"));
    }

    #[test]
    fn forms_carry_busy_indicators() {
        let page = render_page(&PageView {
            document_name: Some("report.pdf"),
            history: &[],
            notice: None,
        });
        assert!(page.contains(UPLOAD_BUSY));
        assert!(page.contains(ASK_BUSY));
    }
}
