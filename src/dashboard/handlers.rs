//! Dashboard HTTP handlers and view rendering.
//!
//! This module contains:
//! - The route handler for displaying the dashboard
//! - HTML view functions for each stage of the bank linking flow
//! - The state type used by the handler

use std::collections::HashMap;

use axum::{
    Extension,
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    aggregation::{category_totals, daily_totals},
    aggregator::AuthNumbers,
    dashboard::charts::{DashboardChart, category_chart, charts_script, daily_spending_chart},
    endpoints,
    gateway::AccountGateway,
    html::{
        BUTTON_PRIMARY_STYLE, HeadElement, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE,
        base, currency_rounded_with_tooltip,
    },
    linking::{LinkPhase, LinkSessionController},
    navigation::NavBar,
    timezone::get_local_offset,
    user_record::{UserAccountRecord, Username},
};

/// Number of days of spending shown in the daily chart and summary card.
const SPENDING_WINDOW_DAYS: usize = 30;

/// The state needed for displaying the dashboard page.
///
/// Contains the gateway for fetching account data, the linking flow state,
/// and timezone information required by the handler.
#[derive(Clone)]
pub struct DashboardState {
    /// Fetches account data for linked users.
    pub gateway: AccountGateway,
    /// Tracks where each user is in the bank linking flow.
    pub controller: LinkSessionController,
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,
}

impl FromRef<AppState> for DashboardState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            gateway: state.gateway.clone(),
            controller: state.controller.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

/// Display a page with an overview of the user's linked bank account.
///
/// Users who have not linked an account get the linking controls instead,
/// and users whose connection is waiting on a failed record write get a
/// retry button.
pub async fn get_dashboard_page(
    State(state): State<DashboardState>,
    Extension(username): Extension<Username>,
) -> Result<Response, Error> {
    let nav_bar = NavBar::new(endpoints::DASHBOARD_VIEW);

    let record = state.gateway.fetch_user_status(username.as_str())?;

    if !record.is_connected() {
        return match state.controller.phase(username.as_str())? {
            LinkPhase::ExchangePending { credential: None } => {
                Ok(retry_panel_view(nav_bar).into_response())
            }
            _ => Ok(connect_panel_view(nav_bar).into_response()),
        };
    }

    let local_timezone = get_local_offset(&state.local_timezone).ok_or_else(|| {
        tracing::error!("Invalid timezone {}", state.local_timezone);
        Error::InvalidTimezoneError(state.local_timezone.clone())
    })?;

    let feed = state.gateway.fetch_transactions(username.as_str()).await?;
    let auth_numbers = state.gateway.fetch_auth_numbers(username.as_str()).await?;

    if feed.added.is_empty() {
        return Ok(dashboard_no_data_view(nav_bar, &record, &auth_numbers).into_response());
    }

    let today = OffsetDateTime::now_utc().to_offset(local_timezone).date();
    let spending_by_day = daily_totals(&feed.added, today, SPENDING_WINDOW_DAYS);
    let spending_by_category = category_totals(&feed.added);
    let window_total: f64 = spending_by_day.iter().map(|&(_, total)| total).sum();

    let charts = [
        DashboardChart {
            id: "category-chart",
            options: category_chart(&spending_by_category).to_string(),
        },
        DashboardChart {
            id: "daily-spending-chart",
            options: daily_spending_chart(&spending_by_day).to_string(),
        },
    ];

    Ok(dashboard_view(nav_bar, &record, &auth_numbers, window_total, &charts).into_response())
}

/// Renders the dashboard page for users without a linked bank account.
///
/// The button is wired up by the linking client script, which requests a
/// link session and opens the linking UI.
fn connect_panel_view(nav_bar: NavBar) -> Markup {
    let content = html!(
        (nav_bar.into_html())

        div class="flex flex-col items-center px-6 py-8 mx-auto text-gray-900 dark:text-white"
        {
            h2 class="text-xl font-bold"
            {
                "No bank account linked yet"
            }

            p class="mb-4"
            {
                "Link a bank account to see its spending here."
            }

            div class="w-full max-w-xs"
            {
                button
                    id="link-button"
                    type="button"
                    class=(BUTTON_PRIMARY_STYLE)
                {
                    "Link bank account"
                }
            }
        }
    );

    base("Dashboard", &linking_scripts(), &content)
}

/// Renders the dashboard page for users whose exchange succeeded but whose
/// connection details were not saved.
fn retry_panel_view(nav_bar: NavBar) -> Markup {
    let content = html!(
        (nav_bar.into_html())

        div class="flex flex-col items-center px-6 py-8 mx-auto text-gray-900 dark:text-white"
        {
            h2 class="text-xl font-bold"
            {
                "Almost there..."
            }

            p class="mb-4"
            {
                "Your bank approved the connection but the details could not be
                saved. Retry below without going through your bank again."
            }

            div class="w-full max-w-xs"
            {
                button
                    id="retry-button"
                    type="button"
                    class=(BUTTON_PRIMARY_STYLE)
                {
                    "Retry saving the connection"
                }
            }
        }
    );

    base("Dashboard", &linking_scripts(), &content)
}

fn linking_scripts() -> [HeadElement; 2] {
    [
        HeadElement::ScriptLink("/static/link-initialize.js".to_owned()),
        HeadElement::ScriptLink("/static/link.js".to_owned()),
    ]
}

/// Renders the dashboard page for a connected user whose bank has not
/// reported any transactions yet.
fn dashboard_no_data_view(
    nav_bar: NavBar,
    record: &UserAccountRecord,
    auth_numbers: &AuthNumbers,
) -> Markup {
    let content = html!(
        (nav_bar.into_html())

        div class="flex flex-col items-center px-2 lg:px-6 lg:py-8 mx-auto
            max-w-screen-xl text-gray-900 dark:text-white"
        {
            (connection_summary_view(record, 0.0))

            h2 class="text-xl font-bold"
            {
                "Nothing here yet..."
            }

            p class="mb-4"
            {
                "Charts will show up here once your bank reports some transactions."
            }

            (account_numbers_view(auth_numbers))
        }
    );

    base("Dashboard", &[], &content)
}

/// Renders the main dashboard page with summary cards, charts, and the
/// linked account numbers.
///
/// # Arguments
/// * `nav_bar` - Navigation bar component
/// * `record` - The user's account record, including the institution name
/// * `auth_numbers` - Account and routing numbers reported by the bank
/// * `window_total` - Total spending over the charted window
/// * `charts` - Dashboard charts to display
fn dashboard_view(
    nav_bar: NavBar,
    record: &UserAccountRecord,
    auth_numbers: &AuthNumbers,
    window_total: f64,
    charts: &[DashboardChart],
) -> Markup {
    let content = html!(
        (nav_bar.into_html())

        div
            id="dashboard-content"
            class="flex flex-col items-center px-2 lg:px-6 lg:py-8 mx-auto
                max-w-screen-xl text-gray-900 dark:text-white"
        {
            (connection_summary_view(record, window_total))

            section
                id="charts"
                class="w-full mx-auto mb-4"
            {
                div class="grid grid-cols-1 xl:grid-cols-2 gap-4"
                {
                    @for chart in charts {
                        div
                            id=(chart.id)
                            class="min-h-[380px] rounded dark:bg-gray-100"
                        {}
                    }
                }
            }

            (account_numbers_view(auth_numbers))
        }
    );

    let scripts = [
        HeadElement::ScriptLink("/static/echarts.6.0.0.min.js".to_owned()),
        charts_script(charts),
    ];

    base("Dashboard", &scripts, &content)
}

/// Renders the cards summarizing the linked institution and recent spending.
fn connection_summary_view(record: &UserAccountRecord, window_total: f64) -> Markup {
    let institution_name = record
        .linked_institution_name
        .as_deref()
        .unwrap_or("your bank");

    html!(
        section
            id="connection-summary"
            class="w-full mx-auto mb-4"
        {
            div class="grid grid-cols-1 sm:grid-cols-2 gap-4"
            {
                div class="bg-white dark:bg-gray-800 border border-gray-200
                    dark:border-gray-700 rounded-lg p-4 shadow-md"
                {
                    h4 class="text-lg font-semibold mb-3" { "Connected bank" }

                    div class="text-3xl font-bold mb-1" { (institution_name) }

                    div class="text-sm text-gray-600 dark:text-gray-400"
                    {
                        "Data refreshes on every visit"
                    }
                }

                div class="bg-white dark:bg-gray-800 border border-gray-200
                    dark:border-gray-700 rounded-lg p-4 shadow-md"
                {
                    h4 class="text-lg font-semibold mb-3" { "Spent in the last 30 days" }

                    div class="text-3xl font-bold mb-1"
                    {
                        (currency_rounded_with_tooltip(window_total))
                    }

                    div class="text-sm text-gray-600 dark:text-gray-400"
                    {
                        "Card spending only, refunds and income excluded"
                    }
                }
            }
        }
    )
}

/// Renders the table of account and routing numbers for the linked account.
///
/// Account numbers are masked down to their last four digits.
fn account_numbers_view(auth_numbers: &AuthNumbers) -> Markup {
    let account_names: HashMap<&str, &str> = auth_numbers
        .accounts
        .iter()
        .map(|account| (account.account_id.as_str(), account.name.as_str()))
        .collect();

    html!(
        section
            id="account-numbers"
            class="w-full mx-auto mb-4"
        {
            h3 class="text-xl font-semibold mb-4" { "Linked accounts" }

            table class="w-full my-2 text-sm text-left rtl:text-right text-gray-500 dark:text-gray-400"
            {
                thead class=(TABLE_HEADER_STYLE)
                {
                    tr
                    {
                        th scope="col" class="px-6 py-3" { "Account" }
                        th scope="col" class="px-6 py-3" { "Account Number" }
                        th scope="col" class="px-6 py-3" { "Routing Number" }
                    }
                }
                tbody
                {
                    @for numbers in &auth_numbers.numbers.ach {
                        tr class=(TABLE_ROW_STYLE) data-account-row="true"
                        {
                            td class=(TABLE_CELL_STYLE)
                            {
                                @if let Some(name) = account_names.get(numbers.account_id.as_str()) {
                                    (name)
                                } @else {
                                    span class="text-gray-400 dark:text-gray-500" { "-" }
                                }
                            }
                            td class=(TABLE_CELL_STYLE) { (mask_account_number(&numbers.account)) }
                            td class=(TABLE_CELL_STYLE) { (numbers.routing) }
                        }
                    }

                    @if auth_numbers.numbers.ach.is_empty() {
                        tr class=(TABLE_ROW_STYLE)
                        {
                            td
                                colspan="3"
                                class="px-6 py-8 text-center text-gray-500 dark:text-gray-400"
                                data-empty-state="true"
                            {
                                "The bank did not report any account numbers."
                            }
                        }
                    }
                }
            }
        }
    )
}

/// Replaces all but the last four digits of an account number with bullets.
fn mask_account_number(account_number: &str) -> String {
    let digit_count = account_number.chars().count();

    account_number
        .chars()
        .enumerate()
        .map(|(index, digit)| {
            if index + 4 < digit_count { '•' } else { digit }
        })
        .collect()
}
