use rand::seq::SliceRandom;
use rand::Rng;

/// Recent desktop user agents, rotated per session to blend in.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.81",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Common desktop footprint with a little jitter, so every session does not
/// report the same window.
pub fn random_viewport() -> (u32, u32) {
    let mut rng = rand::thread_rng();
    let width = 1280 + rng.gen_range(0..7) * 16;
    let height = 720 + rng.gen_range(0..7) * 16;
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_stays_in_desktop_range() {
        for _ in 0..32 {
            let (w, h) = random_viewport();
            assert!((1280..=1376).contains(&w));
            assert!((720..=816).contains(&h));
        }
    }

    #[test]
    fn user_agent_comes_from_the_curated_list() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }
}
