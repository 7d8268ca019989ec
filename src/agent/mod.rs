//! Deterministic offline responder used in place of a live model.

const GREETING_REPLY: &str = "Hello! I'm your AI assistant. How can I help you today?";

const MEETING_EMAIL_REPLY: &str = "Subject: Meeting Request

Dear [Recipient Name],

I hope this email finds you well. I am writing to request a meeting to discuss [specific topic or purpose].

I would appreciate if we could schedule a convenient time for both of us. Please let me know your availability for the upcoming week.

Looking forward to hearing from you.

Best regards,
[Your Name]";

const QUANTUM_REPLY: &str = "Quantum computing is a revolutionary technology that uses quantum mechanical phenomena like superposition and entanglement to process information. Unlike classical computers that use bits (0 or 1), quantum computers use quantum bits or qubits that can exist in multiple states simultaneously. This allows them to solve certain complex problems much faster than traditional computers.";

const PARIS_TRIP_REPLY: &str = "Here's a weekend trip plan for Paris:

**Day 1:**
- Morning: Eiffel Tower and Champ de Mars
- Afternoon: Louvre Museum
- Evening: Seine River cruise and dinner in Montmartre

**Day 2:**
- Morning: Notre-Dame Cathedral and Île de la Cité
- Afternoon: Champs-Élysées and Arc de Triomphe
- Evening: Dinner in Le Marais

**Tips:**
- Book tickets in advance for major attractions
- Use the Metro for transportation
- Try local cuisine like croissants and French wine";

// Built line by line so the indented blank docstring lines keep their spaces.
const PYTHON_SORT_REPLY: &str = concat!(
    "Here's a Python function to sort a list:\n",
    "\n",
    "```python\n",
    "def sort_list(lst, reverse=False):\n",
    "    \"\"\"\n",
    "    Sort a list in ascending or descending order\n",
    "    \n",
    "    Args:\n",
    "        lst: List to sort\n",
    "        reverse: If True, sort in descending order\n",
    "    \n",
    "    Returns:\n",
    "        Sorted list\n",
    "    \"\"\"\n",
    "    return sorted(lst, reverse=reverse)\n",
    "\n",
    "# Example usage:\n",
    "numbers = [3, 1, 4, 1, 5, 9, 2, 6]\n",
    "sorted_numbers = sort_list(numbers)\n",
    "print(sorted_numbers)  # [1, 1, 2, 3, 4, 5, 6, 9]\n",
    "\n",
    "# Sort in descending order\n",
    "desc_numbers = sort_list(numbers, reverse=True)\n",
    "print(desc_numbers)  # [9, 6, 5, 4, 3, 2, 1, 1]\n",
    "```",
);

/// Which canned reply a message maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCategory {
    Greeting,
    MeetingEmail,
    QuantumComputing,
    TripPlanning,
    Coding,
    Fallback,
}

/// Ordered keyword rules; the first rule with any keyword contained in the message wins.
const RULES: &[(ReplyCategory, &[&str])] = &[
    (ReplyCategory::Greeting, &["hello", "hi"]),
    (ReplyCategory::MeetingEmail, &["email", "meeting"]),
    (ReplyCategory::QuantumComputing, &["quantum", "computing"]),
    (ReplyCategory::TripPlanning, &["paris", "trip"]),
    (ReplyCategory::Coding, &["python", "sort"]),
];

/// Keyword-routed canned replies. Matching is a case-insensitive substring test, so "this"
/// counts as containing "hi".
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineResponder;

impl OfflineResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str) -> ReplyCategory {
        let lower = message.to_lowercase();
        RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(ReplyCategory::Fallback)
    }

    pub fn reply(&self, message: &str) -> String {
        match self.classify(message) {
            ReplyCategory::Greeting => GREETING_REPLY.to_string(),
            ReplyCategory::MeetingEmail => MEETING_EMAIL_REPLY.to_string(),
            ReplyCategory::QuantumComputing => QUANTUM_REPLY.to_string(),
            ReplyCategory::TripPlanning => PARIS_TRIP_REPLY.to_string(),
            ReplyCategory::Coding => PYTHON_SORT_REPLY.to_string(),
            ReplyCategory::Fallback => format!(
                "Thank you for your message: \"{message}\". I'm currently in demo mode with static responses. In the full version, I would provide a more detailed and contextual response to your query."
            ),
        }
    }
}
