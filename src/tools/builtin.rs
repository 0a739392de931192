//! Text-processing tools shared by the worker agents and the supervisor

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use super::{FnTool, Tool, ToolDefinition};

pub const UPPERCASE: &str = "uppercase";
pub const COUNT_WORDS: &str = "countWords";
pub const WRITE_STORY: &str = "writeStory";

#[derive(Debug, Deserialize)]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UppercaseOutput {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WordCountOutput {
    pub count: usize,
    pub words: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StoryTopic {
    pub topic: String,
}

fn text_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": description }
        },
        "required": ["text"]
    })
}

pub fn uppercase() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDefinition::new(UPPERCASE, "Convert text to uppercase", text_schema("Text to convert to uppercase")),
        |input: TextInput| Ok(UppercaseOutput { result: input.text.to_uppercase() }),
    ))
}

pub fn count_words() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDefinition::new(COUNT_WORDS, "Count words in text", text_schema("Text to count words in")),
        |input: TextInput| {
            let words: Vec<String> = input.text.split_whitespace().map(str::to_string).collect();
            Ok(WordCountOutput { count: words.len(), words })
        },
    ))
}

/// Only echoes the topic back; the model writes the story itself.
pub fn write_story() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDefinition::new(
            WRITE_STORY,
            "Write a 50-word story about the given text",
            text_schema("Text to write a story about"),
        ),
        |input: TextInput| Ok(StoryTopic { topic: input.text }),
    ))
}
