//! Defines the error alert fragment that HTMX swaps into the alert container
//! fixed to the bottom of every page.

use maud::{Markup, PreEscaped, html};

/// An error alert with a headline and a supporting detail line.
pub struct ErrorAlert<'a> {
    pub message: &'a str,
    pub details: &'a str,
}

impl ErrorAlert<'_> {
    pub fn into_markup(self) -> Markup {
        // Template adapted from https://flowbite.com/docs/components/alerts/#dismissing
        html!(
            div
                class="flex items-start gap-3 p-4 text-red-800 border border-red-300 \
                    rounded-lg bg-red-50 shadow-lg dark:bg-gray-800 dark:text-red-400 \
                    dark:border-red-800"
                role="alert"
            {
                div class="text-sm"
                {
                    p class="font-medium" { (self.message) }

                    @if !self.details.is_empty() {
                        p { (self.details) }
                    }
                }

                button
                    type="button"
                    class="ms-auto -mx-1.5 -my-1.5 rounded-lg p-1.5 text-red-500 \
                        hover:bg-red-200 focus:ring-2 focus:ring-red-400 \
                        dark:text-red-400 dark:hover:bg-gray-700"
                    aria-label="Close"
                    onclick="document.getElementById('alert-container').classList.add('hidden')"
                {
                    "✕"
                }
            }

            // The page shell renders the container hidden. HTMX runs this
            // after swapping the fragment in.
            script {
                (PreEscaped("document.getElementById('alert-container').classList.remove('hidden');"))
            }
        )
    }
}

#[cfg(test)]
mod alert_tests {
    use scraper::{Html, Selector};

    use super::ErrorAlert;

    #[test]
    fn alert_renders_message_and_details() {
        let markup = ErrorAlert {
            message: "Bank data unavailable",
            details: "Try again in a minute.",
        }
        .into_markup();

        let fragment = Html::parse_fragment(&markup.into_string());
        let alert_selector = Selector::parse("div[role=alert]").unwrap();

        let alert = fragment
            .select(&alert_selector)
            .next()
            .expect("fragment should contain an alert");
        let text = alert.text().collect::<String>();

        assert!(text.contains("Bank data unavailable"));
        assert!(text.contains("Try again in a minute."));
    }

    #[test]
    fn alert_without_details_renders_single_line() {
        let markup = ErrorAlert {
            message: "Something went wrong",
            details: "",
        }
        .into_markup();

        let fragment = Html::parse_fragment(&markup.into_string());
        let paragraph_selector = Selector::parse("p").unwrap();

        let paragraphs = fragment.select(&paragraph_selector).count();
        assert_eq!(paragraphs, 1, "want 1 paragraph, got {paragraphs}");
    }
}
