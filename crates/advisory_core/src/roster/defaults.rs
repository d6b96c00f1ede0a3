use crate::models::Advisor;

fn advisor(id: &str, name: &str, role: &str, expertise: &[&str], personality: &str) -> Advisor {
    Advisor {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
        expertise: expertise.iter().map(|item| item.to_string()).collect(),
        personality: personality.to_string(),
        ..Advisor::default()
    }
}

/// Built-in panel used when the backend roster cannot be fetched. Host first.
pub fn default_roster() -> Vec<Advisor> {
    let mut host = advisor(
        "host",
        "Morgan Hale",
        "Meeting Host",
        &["facilitation", "agenda setting", "synthesis"],
        "Calm moderator who keeps the discussion on track and summarizes decisions",
    );
    host.is_host = true;

    vec![
        host,
        advisor(
            "cfo",
            "Priya Raman",
            "Chief Financial Officer",
            &["financial modeling", "fundraising", "unit economics"],
            "Numbers-first and skeptical of optimistic projections",
        ),
        advisor(
            "cmo",
            "Diego Alvarez",
            "Chief Marketing Officer",
            &["brand strategy", "growth marketing", "positioning"],
            "Energetic storyteller focused on the customer",
        ),
        advisor(
            "cto",
            "Lena Fischer",
            "Chief Technology Officer",
            &["architecture", "engineering teams", "build vs buy"],
            "Pragmatic engineer who asks what it takes to ship",
        ),
        advisor(
            "legal",
            "Samuel Okafor",
            "General Counsel",
            &["contracts", "compliance", "intellectual property"],
            "Careful and precise, flags risk early",
        ),
        advisor(
            "ops",
            "Hana Sato",
            "Chief Operating Officer",
            &["operations", "hiring", "process design"],
            "Systematic planner who turns ideas into checklists",
        ),
    ]
}
