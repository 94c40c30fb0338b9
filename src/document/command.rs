//! High-level document operations and their translation to envelopes

use super::color::engine_color;
use super::envelope::Envelope;
use super::value::{tag_arguments, TaggedValue};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// UNO search command codes
const SEARCH_FIND_ALL: i64 = 1;
const SEARCH_REPLACE_ALL: i64 = 3;

const DEFAULT_HIGHLIGHT: &str = "yellow";

/// Formatting applied to the current selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
}

impl FormatOptions {
    pub fn is_empty(&self) -> bool {
        *self == FormatOptions::default()
    }
}

/// A document operation requested by the agent backend
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    InsertText {
        text: String,
    },
    SearchReplace {
        search: String,
        replace: String,
    },
    SearchHighlight {
        search: String,
        color: String,
    },
    FormatRun(FormatOptions),
    NavigateBookmark {
        name: String,
    },
    InsertBookmark {
        name: String,
    },
    /// Envelope forwarded as-is
    RawEnvelope(Envelope),
    /// Call a function of an engine-side script
    RemoteScript {
        script_file: Option<String>,
        function: String,
        args: Map<String, Value>,
    },
}

// Payload shapes of push operations

#[derive(Deserialize)]
struct InsertTextData {
    text: String,
}

#[derive(Deserialize)]
struct SearchReplaceData {
    search_text: String,
    #[serde(default)]
    replace_text: String,
}

#[derive(Deserialize)]
struct SearchHighlightData {
    search_text: String,
    #[serde(default)]
    highlight_color: Option<String>,
}

#[derive(Deserialize)]
struct FormatData {
    format_options: FormatOptions,
}

#[derive(Deserialize)]
struct BookmarkData {
    bookmark_name: String,
}

#[derive(Deserialize)]
struct ScriptData {
    #[serde(default)]
    script_file: Option<String>,
    function: String,
    #[serde(default)]
    args: Map<String, Value>,
}

fn payload<T: DeserializeOwned>(kind: &str, data: &Value) -> Result<T> {
    T::deserialize(data)
        .map_err(|e| Error::InvalidArgument(format!("Bad '{}' payload: {}", kind, e)))
}

fn non_empty(kind: &str, field: &str, value: String) -> Result<String> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "'{}' requires a non-empty {}",
            kind, field
        )));
    }
    Ok(value)
}

impl DocumentCommand {
    /// Wire name of the operation kind
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentCommand::InsertText { .. } => "insert_text",
            DocumentCommand::SearchReplace { .. } => "search_and_replace",
            DocumentCommand::SearchHighlight { .. } => "search_highlight",
            DocumentCommand::FormatRun(_) => "format_text",
            DocumentCommand::NavigateBookmark { .. } => "goto_bookmark",
            DocumentCommand::InsertBookmark { .. } => "insert_bookmark",
            DocumentCommand::RawEnvelope(_) => "raw_envelope",
            DocumentCommand::RemoteScript { .. } => "call_script",
        }
    }

    /// Build a command from a pushed `(operationKind, data)` pair
    pub fn from_operation(kind: &str, data: &Value) -> Result<Self> {
        let command = match kind {
            "insert_text" => {
                let d: InsertTextData = payload(kind, data)?;
                DocumentCommand::InsertText { text: d.text }
            }
            "search_and_replace" => {
                let d: SearchReplaceData = payload(kind, data)?;
                DocumentCommand::SearchReplace {
                    search: non_empty(kind, "search_text", d.search_text)?,
                    replace: d.replace_text,
                }
            }
            "search_highlight" => {
                let d: SearchHighlightData = payload(kind, data)?;
                DocumentCommand::SearchHighlight {
                    search: non_empty(kind, "search_text", d.search_text)?,
                    color: d
                        .highlight_color
                        .unwrap_or_else(|| DEFAULT_HIGHLIGHT.to_string()),
                }
            }
            "format_text" => {
                // Options may come wrapped in `format_options` or flat
                let options = match data.get("format_options") {
                    Some(_) => payload::<FormatData>(kind, data)?.format_options,
                    None => payload::<FormatOptions>(kind, data)?,
                };
                DocumentCommand::FormatRun(options)
            }
            "goto_bookmark" => {
                let d: BookmarkData = payload(kind, data)?;
                DocumentCommand::NavigateBookmark {
                    name: non_empty(kind, "bookmark_name", d.bookmark_name)?,
                }
            }
            "insert_bookmark" => {
                let d: BookmarkData = payload(kind, data)?;
                DocumentCommand::InsertBookmark {
                    name: non_empty(kind, "bookmark_name", d.bookmark_name)?,
                }
            }
            "raw_envelope" => DocumentCommand::RawEnvelope(payload(kind, data)?),
            "call_script" => {
                let d: ScriptData = payload(kind, data)?;
                DocumentCommand::RemoteScript {
                    script_file: d.script_file,
                    function: non_empty(kind, "function", d.function)?,
                    args: d.args,
                }
            }
            other => return Err(Error::UnknownOperation(other.to_string())),
        };
        Ok(command)
    }

    /// Translate into the envelopes that carry it out, in order.
    ///
    /// `default_script` is used for remote scripts that name no file.
    pub fn to_envelopes(&self, default_script: &str) -> Result<Vec<Envelope>> {
        match self {
            DocumentCommand::InsertText { text } => Ok(vec![Envelope::paste_text(text)]),
            DocumentCommand::SearchReplace { search, replace } => Ok(vec![Envelope::uno_command(
                ".uno:ExecuteSearch",
                vec![
                    ("SearchItem.SearchString", TaggedValue::string(search.as_str())),
                    ("SearchItem.ReplaceString", TaggedValue::string(replace.as_str())),
                    ("SearchItem.Command", TaggedValue::long(SEARCH_REPLACE_ALL)),
                ],
            )?]),
            DocumentCommand::SearchHighlight { search, color } => {
                let packed = engine_color(color)?;
                Ok(vec![
                    Envelope::uno_command(
                        ".uno:ExecuteSearch",
                        vec![
                            ("SearchItem.SearchString", TaggedValue::string(search.as_str())),
                            ("SearchItem.Command", TaggedValue::long(SEARCH_FIND_ALL)),
                        ],
                    )?,
                    Envelope::uno_command(
                        ".uno:CharBackColor",
                        vec![("BackColor", TaggedValue::long(packed))],
                    )?,
                ])
            }
            DocumentCommand::FormatRun(options) => format_envelopes(options),
            DocumentCommand::NavigateBookmark { name } => Ok(vec![Envelope::goto_bookmark(name)]),
            DocumentCommand::InsertBookmark { name } => Ok(vec![Envelope::uno_command(
                ".uno:InsertBookmark",
                vec![("Bookmark", TaggedValue::string(name.as_str()))],
            )?]),
            DocumentCommand::RawEnvelope(envelope) => Ok(vec![envelope.clone()]),
            DocumentCommand::RemoteScript {
                script_file,
                function,
                args,
            } => Ok(vec![Envelope::call_script(
                script_file.as_deref().unwrap_or(default_script),
                function,
                tag_arguments(args)?,
            )]),
        }
    }
}

fn format_envelopes(options: &FormatOptions) -> Result<Vec<Envelope>> {
    if options.is_empty() {
        return Err(Error::InvalidArgument(
            "format_text requires at least one option".to_string(),
        ));
    }

    let mut envelopes = Vec::new();
    if let Some(font) = &options.font_name {
        envelopes.push(Envelope::uno_command(
            ".uno:CharFontName",
            vec![("CharFontName.FamilyName", TaggedValue::string(font.as_str()))],
        )?);
    }
    if let Some(size) = options.font_size {
        if !(size.is_finite() && size > 0.0) {
            return Err(Error::InvalidArgument(format!("Invalid font size {}", size)));
        }
        envelopes.push(Envelope::uno_command(
            ".uno:FontHeight",
            vec![("FontHeight.Height", TaggedValue::tag(&Value::from(size))?)],
        )?);
    }
    if let Some(color) = &options.color {
        envelopes.push(Envelope::uno_command(
            ".uno:Color",
            vec![("Color.Color", TaggedValue::long(engine_color(color)?))],
        )?);
    }
    if let Some(bold) = options.bold {
        envelopes.push(Envelope::uno_command(
            ".uno:Bold",
            vec![("Bold", TaggedValue::boolean(bold))],
        )?);
    }
    if let Some(italic) = options.italic {
        envelopes.push(Envelope::uno_command(
            ".uno:Italic",
            vec![("Italic", TaggedValue::boolean(italic))],
        )?);
    }
    if let Some(underline) = options.underline {
        // LineStyle 1 is a single line, 0 removes it
        envelopes.push(Envelope::uno_command(
            ".uno:Underline",
            vec![("Underline.LineStyle", TaggedValue::long(i64::from(underline)))],
        )?);
    }
    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(envelope: &Envelope) -> &Value {
        &envelope.values["Args"]
    }

    #[test]
    fn test_parse_known_operations() {
        assert_eq!(
            DocumentCommand::from_operation("insert_text", &json!({"text": "Hi"})).unwrap(),
            DocumentCommand::InsertText { text: "Hi".into() }
        );
        assert_eq!(
            DocumentCommand::from_operation("search_highlight", &json!({"search_text": "x"}))
                .unwrap(),
            DocumentCommand::SearchHighlight {
                search: "x".into(),
                color: "yellow".into()
            }
        );
        assert_eq!(
            DocumentCommand::from_operation("goto_bookmark", &json!({"bookmark_name": "intro"}))
                .unwrap()
                .kind(),
            "goto_bookmark"
        );
    }

    #[test]
    fn test_format_options_wrapped_or_flat() {
        let wrapped = DocumentCommand::from_operation(
            "format_text",
            &json!({"format_options": {"bold": true, "font_size": 12}}),
        )
        .unwrap();
        let flat =
            DocumentCommand::from_operation("format_text", &json!({"bold": true, "font_size": 12}))
                .unwrap();
        assert_eq!(wrapped, flat);
    }

    #[test]
    fn test_unknown_and_malformed_operations() {
        assert!(matches!(
            DocumentCommand::from_operation("delete_everything", &json!({})),
            Err(Error::UnknownOperation(kind)) if kind == "delete_everything"
        ));
        assert!(matches!(
            DocumentCommand::from_operation("insert_text", &json!({"txt": "typo"})),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            DocumentCommand::from_operation("insert_bookmark", &json!({"bookmark_name": ""})),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_insert_text_is_paste() {
        let envelopes = DocumentCommand::InsertText { text: "Hello".into() }
            .to_envelopes("office_api.py")
            .unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].message_id, "Action_Paste");
        assert_eq!(envelopes[0].values["Data"], "Hello");
        assert_eq!(envelopes[0].values["Mimetype"], "text/plain;charset=utf-8");
    }

    #[test]
    fn test_search_replace_translation() {
        let envelopes = DocumentCommand::SearchReplace {
            search: "foo".into(),
            replace: "bar".into(),
        }
        .to_envelopes("office_api.py")
        .unwrap();
        assert_eq!(envelopes[0].uno_command_name(), Some(".uno:ExecuteSearch"));
        let a = args(&envelopes[0]);
        assert_eq!(a["SearchItem.SearchString"]["value"], "foo");
        assert_eq!(a["SearchItem.ReplaceString"]["value"], "bar");
        assert_eq!(a["SearchItem.Command"], json!({"type": "long", "value": 3}));
    }

    #[test]
    fn test_highlight_selects_then_colors() {
        let envelopes = DocumentCommand::SearchHighlight {
            search: "term".into(),
            color: "#FF0000".into(),
        }
        .to_envelopes("office_api.py")
        .unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(args(&envelopes[0])["SearchItem.Command"]["value"], 1);
        assert_eq!(envelopes[1].uno_command_name(), Some(".uno:CharBackColor"));
        assert_eq!(args(&envelopes[1])["BackColor"]["value"], 0x0000FF);
    }

    #[test]
    fn test_highlight_rejects_bad_color() {
        let result = DocumentCommand::SearchHighlight {
            search: "term".into(),
            color: "not-a-color".into(),
        }
        .to_envelopes("office_api.py");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_format_run_one_command_per_option() {
        let options = FormatOptions {
            font_name: Some("Arial".into()),
            font_size: Some(14.0),
            color: Some("blue".into()),
            bold: Some(true),
            italic: None,
            underline: Some(false),
        };
        let envelopes = DocumentCommand::FormatRun(options)
            .to_envelopes("office_api.py")
            .unwrap();
        let commands: Vec<_> = envelopes.iter().filter_map(Envelope::uno_command_name).collect();
        assert_eq!(
            commands,
            vec![".uno:CharFontName", ".uno:FontHeight", ".uno:Color", ".uno:Bold", ".uno:Underline"]
        );
        assert_eq!(
            args(&envelopes[1])["FontHeight.Height"],
            json!({"type": "long", "value": 14})
        );
        assert_eq!(args(&envelopes[2])["Color.Color"]["value"], 0xFF0000);
        assert_eq!(args(&envelopes[4])["Underline.LineStyle"]["value"], 0);
    }

    #[test]
    fn test_empty_format_rejected() {
        let result = DocumentCommand::FormatRun(FormatOptions::default()).to_envelopes("x.py");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_remote_script_uses_default_file_and_tags_args() {
        let command = DocumentCommand::from_operation(
            "call_script",
            &json!({"function": "get_document_content", "args": {"limit": 10, "raw": false}}),
        )
        .unwrap();
        let envelopes = command.to_envelopes("office_api.py").unwrap();
        assert_eq!(envelopes[0].message_id, "CallPythonScript");
        assert_eq!(envelopes[0].script_file.as_deref(), Some("office_api.py"));
        assert_eq!(envelopes[0].function.as_deref(), Some("get_document_content"));
        assert_eq!(envelopes[0].values["limit"], json!({"type": "long", "value": 10}));
        assert_eq!(envelopes[0].values["raw"], json!({"type": "boolean", "value": false}));
    }

    #[test]
    fn test_raw_envelope_passthrough() {
        let raw = json!({"MessageId": "Action_Save", "SendTime": 5, "Values": {"Notify": true}});
        let command = DocumentCommand::from_operation("raw_envelope", &raw).unwrap();
        let envelopes = command.to_envelopes("office_api.py").unwrap();
        assert_eq!(serde_json::to_value(&envelopes[0]).unwrap(), raw);
    }

    #[test]
    fn test_bookmarks() {
        let goto = DocumentCommand::NavigateBookmark { name: "intro".into() }
            .to_envelopes("x.py")
            .unwrap();
        assert_eq!(goto[0].message_id, "Action_GotoBookmark");
        assert_eq!(goto[0].values["Bookmark"], "intro");

        let insert = DocumentCommand::InsertBookmark { name: "end".into() }
            .to_envelopes("x.py")
            .unwrap();
        assert_eq!(insert[0].uno_command_name(), Some(".uno:InsertBookmark"));
        assert_eq!(args(&insert[0])["Bookmark"]["value"], "end");
    }
}
