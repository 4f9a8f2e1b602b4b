//! These models represent the objects passed around by the conversation loop
//!
//! There are several different related formats we need to interact with:
//! - discord messages and attachments, sent from the gateway to the loop
//! - openai chat completion messages/tools, sent from the loop to the LLM
//! - openai responses items/tools, sent from the loop to the LLM
//! - gemini contents/function declarations, sent from the loop to the LLM
//! - tool calls, sent from the loop to the systems providing capabilities
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod content;
pub mod conversation;
pub mod message;
pub mod role;
pub mod tool;
