use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::letters::sanitize_company;
use crate::models::{CandidateProfile, JobRecord, prefix};

const DESCRIPTION_PROMPT_CHARS: usize = 1000;

const OPENING_STYLES: [(&str, &str); 10] = [
    (
        "High-impact & confident",
        "I'm reaching out because your team is working on exactly the kind of challenges I've spent the last few years mastering, and I'm ready to contribute from day one.",
    ),
    (
        "Curiosity-driven",
        "Your role stood out to me for one reason: it aligns remarkably well with the problems I'm already passionate about solving.",
    ),
    (
        "Value-forward",
        "Before sharing my background, I'll start with what matters most: I can help your team achieve [specific outcome] by [specific approach], and I'd like to demonstrate how.",
    ),
    (
        "Story-driven",
        "When I read your job posting, I immediately recognised a familiar challenge, one I've tackled successfully before and would be keen to approach again.",
    ),
    (
        "Bold and concise",
        "I know how to deliver tangible results in this role, and I'd welcome the chance to prove it.",
    ),
    (
        "Human, warm, genuine",
        "This role feels like a rare instance where my strengths and your team's needs align with unusual precision.",
    ),
    (
        "Problem-solution framing",
        "You're looking for someone who can take ownership of [specific responsibility], and that's exactly where I've delivered my strongest results.",
    ),
    (
        "Outcome-focused",
        "I'm reaching out because I specialise in turning challenges like yours into clear, measurable wins.",
    ),
    (
        "Strategic positioning",
        "What drew me to this position is how closely it aligns with the kind of impact I've been delivering, and hope to expand, in my next role.",
    ),
    (
        "Vivid & memorable",
        "Opportunities like this are uncommon, especially ones that match both my experience and long-term direction so precisely.",
    ),
];

const BANNED_WORDS: &str = "can, may, just, that, very, really, literally, actually, certainly, probably, \
basically, could, maybe, delve, embark, enlightening, esteemed, shed light, craft, crafting, imagine, \
realm, game-changer, unlock, discover, skyrocket, abyss, not alone, in a world where, revolutionize, \
disruptive, utilize, utilizing, dive deep, tapestry, illuminate, unveil, pivotal, intricate, elucidate, \
hence, furthermore, however, harness, exciting, excited, groundbreaking, cutting-edge, remarkable, it, \
remains to be seen, glimpse into, navigating, landscape, stark, testament, in summary, in conclusion, \
moreover, boost, skyrocketing, opened up, powerful, inquiries, ever-evolving";

/// Builds every cover-letter prompt from one candidate profile.
pub struct PromptBuilder<'a> {
    profile: &'a CandidateProfile,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(profile: &'a CandidateProfile) -> Self {
        Self { profile }
    }

    fn credentials(&self) -> String {
        let credentials = self.profile.credentials_to_mention();
        if credentials.is_empty() {
            "education and training".to_string()
        } else {
            credentials.join(", ")
        }
    }

    fn field(&self) -> String {
        if !self.profile.industries.is_empty() {
            self.profile.industries.join(", ")
        } else if !self.profile.core_skills.is_empty() {
            self.profile.core_skills.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
        } else {
            "my field".to_string()
        }
    }

    /// Full drafting prompt for one job. With `include_judge` the checklist is appended
    /// so the prompt works standalone in a chat assistant.
    pub fn draft_prompt(&self, job: &JobRecord, include_judge: bool) -> String {
        let p = self.profile;
        let current_company = p.current_company.as_deref().unwrap_or_default();
        let current_role = match current_company {
            "" => p.current_title.as_deref().unwrap_or("Professional").to_string(),
            company => format!("{} at {company}", p.current_title.as_deref().unwrap_or("Professional")),
        };
        let openings: String = OPENING_STYLES
            .iter()
            .map(|(style, example)| format!("     * {style}: \"{example}\"\n"))
            .collect();
        let technologies = if p.core_skills.is_empty() {
            String::new()
        } else {
            format!(" ({}, etc.)", p.core_skills.iter().take(4).cloned().collect::<Vec<_>>().join(", "))
        };
        let credentials = self.credentials();

        let mut prompt = format!(
            "You are helping me write a professional, compelling job application cover letter. Here's the context:\n\n\
## MY PROFESSIONAL PROFILE:\n\
**Name:** {name}\n\
**Current Role:** {current_role}\n\
**Experience:** {years} years in {field}\n\n\
**Education:**\n{education}\n\n\
**Core Technical Skills:**\n{skills}\n\n\
**Key Achievements:**\n{achievements}\n\n\
**Target Roles:** {targets}\n\
**Preferred Locations:** {locations}\n\n\
## JOB DETAILS:\n\
**Position:** {title}\n\
**Company:** {company}\n\
**Location:** {location}\n\
**Job Description:** {description}\n\
**Job Link:** {link}\n\
**Source:** {source}\n\n\
## WRITING STYLE GUIDELINES:\n\
1. **Tone:** Bold, humble, creative, corporate. Confident without arrogance\n\
2. **Length:** Concise (250-350 words max). Hiring managers are busy\n\
3. **Structure:**\n\
\x20  - **Opening Sentence:** Choose ONE of these styles (convey the job, my background, and tone):\n\
{openings}\
\x20  - Body Paragraph 1: Highlight current role and 3-4 specific achievements using **bullet points**\n\
\x20  - Body Paragraph 2: Mention technical expertise and education ({credentials})\n\
\x20  - Closing: Express enthusiasm for the specific company and suggest next steps\n\
4. **Avoid:**\n\
\x20  - Generic phrases like \"I am writing to apply\" or \"I am excited to apply\"\n\
\x20  - Overly formal or stiff language\n\
\x20  - Buzzwords without substance\n\
\x20  - Starting with \"Dear Hiring Manager\" (use a more direct opening)\n\
5. **Include:**\n\
\x20  - **Bullet points** for achievements (CRITICAL)\n\
\x20  - Specific examples of relevant work\n\
\x20  - Quantifiable achievements where possible\n\
\x20  - Genuine interest in the company/role\n\
\x20  - Clear connection between my experience and their needs\n\n\
## FOLLOW THIS WRITING STYLE:\n\
**SHOULD:**\n\
- Use clear, simple language\n\
- Be spartan and informative\n\
- Use short, impactful sentences\n\
- Use active voice (avoid passive voice)\n\
- Focus on practical, actionable insights\n\
- **Use a bulleted list for key achievements**\n\
- Use data and examples to support claims when possible\n\
- Use \"you\" and \"your\" to directly address the reader\n\n\
**AVOID:**\n\
- Em dashes (\u{2014}) anywhere in your response. Use only commas, periods, or other standard punctuation\n\
- Constructions like \"...not just this, but also this\"\n\
- Metaphors and clich\u{e9}s\n\
- Generalizations\n\
- Common setup language in any sentence (in conclusion, in closing, etc.)\n\
- Output warnings or notes, just the output requested\n\
- Unnecessary adjectives and adverbs\n\
- Hashtags\n\
- Semicolons\n\
- Markdown formatting (except for the bullet list)\n\
- Asterisks\n\
- These words: \"{banned}\"\n\n\
**IMPORTANT:** Review your response and ensure no em dashes are used!\n\n\
## TASK:\n\
Write a compelling job application cover letter that:\n\
1. Has a strong, specific subject line\n\
2. **Opens with ONE of the provided opening sentence styles**, conveying the job, my background, and a bold/humble/creative/corporate tone\n\
3. **Must include a bulleted list** of 3-4 relevant achievements from my profile\n\
4. **Must mention** my {credentials}\n\
5. Shows I understand what the company does and why I want to work there\n\
6. Ends with a clear call to action\n\
7. Maintains a warm, professional tone throughout\n\
8. **Tone must be: bold, humble, creative, corporate**\n\n\
## ADDITIONAL CONTEXT:\n\
- Research the company ({company}) and mention something specific about them if possible\n\
- Match my skills to the job requirements intelligently\n\
- If the job mentions specific technologies I have{technologies}, emphasize those\n\
- Keep it authentic. This should sound like a real person, not a template\n",
            name = p.display_name(),
            years = p.experience_years.as_deref().unwrap_or("several"),
            field = self.field(),
            education = bullet_list(&p.education),
            skills = bullet_list(&p.core_skills),
            achievements = bullet_list(&p.key_achievements),
            targets = p.target_roles.join(", "),
            locations = p.locations.join(", "),
            title = job.title,
            company = job.company,
            location = job.location,
            description = prefix(&job.description, DESCRIPTION_PROMPT_CHARS),
            link = job.link,
            source = job.source,
            banned = BANNED_WORDS,
        );

        if include_judge {
            prompt.push_str("\n\n");
            prompt.push_str(&self.judge_checklist());
            prompt.push_str("\n\nPlease write the cover letter now, then review it against all checks above before submitting.");
        } else {
            prompt.push_str("\n\nPlease write the cover letter now.");
        }
        prompt
    }

    pub fn judge_checklist(&self) -> String {
        format!(
            "## AI JUDGE - QUALITY CONTROL:\n\
Before submitting your final cover letter, act as a strict quality judge and verify:\n\n\
**CRITICAL CHECKS (Must Pass All):**\n\
1. No em dashes (\u{2014}) anywhere in the cover letter\n\
2. No semicolons anywhere in the cover letter\n\
3. No markdown formatting (no **, __, ##, etc.) EXCEPT for the bullet list\n\
4. No asterisks for emphasis\n\
5. No hashtags\n\
6. All sentences use active voice (not passive)\n\
7. No banned words from the list above (including \"excited\")\n\
8. **Does NOT start with \"I am excited to apply\"**\n\
9. No metaphors or clich\u{e9}s\n\
10. Cover letter is 250-350 words maximum\n\n\
**STYLE CHECKS (Must Pass All):**\n\
1. Uses short, impactful sentences\n\
2. Uses clear, simple language\n\
3. Addresses reader with \"you\" and \"your\"\n\
4. Includes specific examples and data\n\
5. Sounds like a real person, not a template\n\
6. **Includes a bulleted list** for achievements\n\n\
**CONTENT CHECKS (Must Pass All):**\n\
1. Subject line is specific and compelling\n\
2. **Opening sentence follows ONE of the provided styles** (bold, humble, creative, corporate tone)\n\
3. Opening conveys: the job, my background, and appropriate tone\n\
4. Highlights 3-4 relevant achievements in bullets\n\
5. **Mentions {credentials}**\n\
6. Shows understanding of the company\n\
7. Ends with clear call to action\n\
8. Mentions specific technologies from job description\n\
9. Overall tone is: bold, humble, creative, corporate\n\n\
**IF ANY CHECK FAILS:** Revise the cover letter and check again. Do not output until ALL checks pass.",
            credentials = self.credentials(),
        )
    }

    pub fn judge_prompt(&self, draft: &str) -> String {
        format!(
            "You are a strict AI Quality Assurance Judge.\n\
Your task is to review the following cover letter draft against a set of strict criteria.\n\n\
## CRITERIA TO CHECK:\n{criteria}\n\n\
## COVER LETTER DRAFT:\n{draft}\n\n\
## TASK:\n\
Evaluate if the cover letter meets ALL the criteria.\n\
If it fails ANY check, it is a FAIL.\n\n\
Respond with this exact JSON format:\n\
{{\n  \"status\": \"PASS\" or \"FAIL\",\n  \"feedback\": \"If FAIL, list specific violations. If PASS, write 'All checks passed'.\"\n}}\n",
            criteria = self.judge_checklist(),
        )
    }

    pub fn refine_prompt(&self, draft: &str, feedback: &str) -> String {
        format!(
            "You are a professional cover letter writer.\n\
Here is a draft cover letter you wrote:\n\n{draft}\n\n\
The Quality Assurance team found these issues:\n{feedback}\n\n\
Please rewrite the cover letter to fix these issues while maintaining the original tone and content.\n\
Ensure you strictly follow the original style guidelines.\n"
        )
    }

    /// Write one standalone prompt file per job. Returns the paths written.
    pub fn export_prompts(&self, jobs: &[JobRecord], dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create prompts directory: {}", dir.display()))?;

        let mut written = Vec::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            let path = dir.join(prompt_file_name(i + 1, &job.company));
            fs::write(&path, self.draft_prompt(job, true))
                .with_context(|| format!("Failed to write prompt: {}", path.display()))?;
            written.push(path);
        }
        info!(count = written.len(), dir = %dir.display(), "Wrote AI prompts");
        Ok(written)
    }
}

pub fn prompt_file_name(index: usize, company: &str) -> String {
    format!("job_{index:03}_{}_PROMPT.txt", sanitize_company(company))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
