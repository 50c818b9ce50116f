//! Browser fingerprint profiles: user agents, viewports, spoofing scripts and
//! simulated pointer/scroll activity.

use super::{Interaction, Viewport};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::time::Duration;

/// Desktop profile used by the basic strategy.
pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DESKTOP_VIEWPORT: Viewport = Viewport::new(1920, 1080);

pub const USER_AGENTS: &[&str] = &[
    DESKTOP_USER_AGENT,
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const VIEWPORTS: &[Viewport] = &[
    DESKTOP_VIEWPORT,
    Viewport::new(1366, 768),
    Viewport::new(1440, 900),
    Viewport::new(1536, 864),
    Viewport::new(1680, 1050),
    Viewport::new(2560, 1440),
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.8,fr;q=0.5",
];

/// Scripts evaluated before any page script runs.
pub const STEALTH_SCRIPTS: &[&str] = &[
    // navigator.webdriver
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });",
    "Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5]\
     .map(i => ({ name: 'Plugin ' + i, filename: 'plugin' + i + '.so' })) });",
    "Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });",
    "window.chrome = window.chrome || { runtime: {} };",
    r#"(() => {
        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function (parameter) {
            if (parameter === 37445) { return 'Intel Inc.'; }
            if (parameter === 37446) { return 'Intel Iris OpenGL Engine'; }
            return getParameter.call(this, parameter);
        };
    })();"#,
    r#"(() => {
        const query = window.navigator.permissions && window.navigator.permissions.query;
        if (query) {
            window.navigator.permissions.query = (parameters) =>
                parameters.name === 'notifications'
                    ? Promise.resolve({ state: Notification.permission })
                    : query(parameters);
        }
    })();"#,
];

pub fn random_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(DESKTOP_USER_AGENT)
}

/// A known desktop size, jittered by a few pixels.
pub fn random_viewport<R: Rng + ?Sized>(rng: &mut R) -> Viewport {
    let base = VIEWPORTS.choose(rng).copied().unwrap_or(DESKTOP_VIEWPORT);
    Viewport {
        width: base.width - rng.random_range(0..=24),
        height: base.height - rng.random_range(0..=24),
    }
}

pub fn random_accept_language<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    ACCEPT_LANGUAGES.choose(rng).copied().unwrap_or("en-US,en;q=0.9")
}

/// A short burst of pointer moves, pauses and scrolls within `viewport`.
pub fn random_interactions<R: Rng + ?Sized>(rng: &mut R, viewport: Viewport) -> Vec<Interaction> {
    let mut steps = Vec::new();
    for _ in 0..rng.random_range(2..=5) {
        steps.push(Interaction::MoveMouse {
            x: rng.random_range(0..viewport.width),
            y: rng.random_range(0..viewport.height),
        });
        steps.push(Interaction::Pause(Duration::from_millis(rng.random_range(50..=300))));
    }
    for _ in 0..rng.random_range(1..=3) {
        steps.push(Interaction::Scroll {
            delta_y: rng.random_range(200..=900),
        });
        steps.push(Interaction::Pause(Duration::from_millis(rng.random_range(200..=800))));
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_profile_stays_in_bounds() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let viewport = random_viewport(&mut rng);
            assert!((1342..=2560).contains(&viewport.width));
            assert!((744..=1440).contains(&viewport.height));
            assert!(USER_AGENTS.contains(&random_user_agent(&mut rng)));

            let steps = random_interactions(&mut rng, viewport);
            assert!(steps.iter().any(|s| matches!(s, Interaction::Scroll { .. })));
            for step in steps {
                if let Interaction::MoveMouse { x, y } = step {
                    assert!(x < viewport.width && y < viewport.height);
                }
            }
        }
    }

    #[test]
    fn test_stealth_scripts_hide_webdriver() {
        assert!(STEALTH_SCRIPTS.iter().any(|s| s.contains("webdriver")));
        assert!(STEALTH_SCRIPTS.iter().any(|s| s.contains("WebGLRenderingContext")));
    }
}
