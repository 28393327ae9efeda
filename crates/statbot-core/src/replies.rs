//! Canned auto-replies for direct conversations

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

pub fn auto_reply_templates(bot_name: &str, sender: &str, prefix: &str) -> [String; 4] {
    [
        format!("👋 Hi {}, I'm {}", sender, bot_name),
        "🤖 The bot received your message".to_string(),
        format!("💡 Type \"{}help\" to see the commands", prefix),
        "📊 I'm a message statistics bot".to_string(),
    ]
}

pub fn pick_auto_reply<R: Rng + ?Sized>(
    rng: &mut R,
    bot_name: &str,
    sender: &str,
    prefix: &str,
) -> String {
    let templates = auto_reply_templates(bot_name, sender, prefix);
    templates
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| templates[0].clone())
}

/// Uniform in `[min_ms, max_ms]`.
pub fn reply_delay<R: Rng + ?Sized>(rng: &mut R, min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::{auto_reply_templates, pick_auto_reply, reply_delay};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    #[test]
    fn picked_reply_is_one_of_the_templates() {
        let mut rng = StdRng::seed_from_u64(7);
        let templates = auto_reply_templates("StatsBot", "Alice", "!");
        for _ in 0..50 {
            let reply = pick_auto_reply(&mut rng, "StatsBot", "Alice", "!");
            assert!(templates.contains(&reply));
        }
    }

    #[test]
    fn templates_mention_sender_and_prefix() {
        let templates = auto_reply_templates("StatsBot", "Alice", "#");
        assert!(templates[0].contains("Alice"));
        assert!(templates[0].contains("StatsBot"));
        assert!(templates[2].contains("#help"));
    }

    #[test]
    fn delay_stays_inside_window() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let delay = reply_delay(&mut rng, 1000, 3000);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(3000));
        }
        assert_eq!(reply_delay(&mut rng, 500, 500), Duration::from_millis(500));
    }
}
