use serde::{Deserialize, Serialize};

/// A single message in a conversation thread.
///
/// Messages carry a role and text content. They are what the conversation
/// store persists per thread and what the agent feeds back to the language
/// model as history on the next turn.
///
/// # Examples
///
/// ```
/// use debatesmith::message::Message;
///
/// let question = Message::user("How did Caroline Lucas vote on fracking?");
/// assert_eq!(question.role, Message::USER);
///
/// let reply = Message::assistant("She voted against every fracking motion on record.");
/// assert!(reply.has_role(Message::ASSISTANT));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Role of the sender. Use the constants on [`Message`] for the
    /// standard values.
    pub role: String,
    /// Text content of the message.
    pub content: String,
}

impl Message {
    /// End-user input.
    pub const USER: &'static str = "user";
    /// Model-produced answer.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction.
    pub const SYSTEM: &'static str = "system";
    /// Serialized tool result fed back into the planning loop.
    pub const TOOL: &'static str = "tool";

    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a tool-result message.
    #[must_use]
    pub fn tool(content: &str) -> Self {
        Self::new(Self::TOOL, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}
