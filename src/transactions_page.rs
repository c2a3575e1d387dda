//! Displays the linked bank account's transaction feed.

use std::collections::HashMap;

use axum::{
    Extension,
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    AppState, Error,
    aggregation::sort_by_date_descending,
    aggregator::TransactionRecord,
    endpoints,
    gateway::AccountGateway,
    html::{
        CATEGORY_BADGE_STYLE, PAGE_CONTAINER_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE,
        TABLE_ROW_STYLE, base, format_currency, link,
    },
    navigation::NavBar,
    user_record::Username,
};

/// Positive amounts are spend, negative amounts are credits such as refunds
/// and income.
fn amount_class(amount: f64) -> &'static str {
    if amount > 0.0 {
        "text-red-700 dark:text-red-300"
    } else {
        "text-green-700 dark:text-green-300"
    }
}

/// Renders the transactions page for the logged-in user.
///
/// The feed is displayed newest first. Users who have not linked a bank
/// account yet get a prompt pointing at the dashboard instead of a table.
pub async fn get_transactions_page(
    State(state): State<TransactionsPageState>,
    Extension(username): Extension<Username>,
) -> Response {
    let feed = match state.gateway.fetch_transactions(username.as_str()).await {
        Ok(feed) => feed,
        Err(Error::NotConnected) => return not_connected_view().into_response(),
        Err(error) => return error.into_response(),
    };

    let account_names: HashMap<String, String> = feed
        .accounts
        .into_iter()
        .map(|account| (account.account_id, account.name))
        .collect();
    let transactions = sort_by_date_descending(feed.added);

    transactions_view(&transactions, &account_names).into_response()
}

/// The state needed for the [get_transactions_page] route handler.
#[derive(Clone)]
pub struct TransactionsPageState {
    pub gateway: AccountGateway,
}

impl FromRef<AppState> for TransactionsPageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            gateway: state.gateway.clone(),
        }
    }
}

fn transactions_view(
    transactions: &[TransactionRecord],
    account_names: &HashMap<String, String>,
) -> Markup {
    let nav_bar = NavBar::new(endpoints::TRANSACTIONS_VIEW).into_html();

    let content = html! {
        (nav_bar)

        main class=(PAGE_CONTAINER_STYLE)
        {
            section class="space-y-4"
            {
                header class="flex justify-between flex-wrap items-end"
                {
                    h1 class="text-xl font-bold" { "Transactions" }
                }

                section class="rounded bg-gray-50 dark:bg-gray-800 overflow-hidden lg:max-w-5xl lg:w-full lg:mx-auto"
                {
                    table class="w-full my-2 text-sm text-left rtl:text-right
                        text-gray-500 dark:text-gray-400"
                    {
                        thead class=(TABLE_HEADER_STYLE)
                        {
                            tr
                            {
                                th scope="col" class="px-6 py-3 text-right"
                                {
                                    "Amount"
                                }
                                th scope="col" class=(TABLE_CELL_STYLE)
                                {
                                    "Date"
                                }
                                th scope="col" class=(TABLE_CELL_STYLE)
                                {
                                    "Account"
                                }
                                th scope="col" class=(TABLE_CELL_STYLE)
                                {
                                    "Merchant"
                                }
                                th scope="col" class=(TABLE_CELL_STYLE)
                                {
                                    "Categories"
                                }
                            }
                        }

                        tbody
                        {
                            @for transaction in transactions {
                                (transaction_row_view(transaction, account_names))
                            }

                            @if transactions.is_empty() {
                                tr
                                {
                                    td
                                        colspan="5"
                                        data-empty-state="true"
                                        class="px-6 py-4 text-center"
                                    {
                                        "No transactions yet. New activity on the linked account will show up here."
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    base("Transactions", &[], &content)
}

fn transaction_row_view(
    transaction: &TransactionRecord,
    account_names: &HashMap<String, String>,
) -> Markup {
    let amount_str = format_currency(transaction.amount);
    let amount_class = amount_class(transaction.amount);
    let account_name = account_names.get(&transaction.account_id);

    html! {
        tr class=(TABLE_ROW_STYLE) data-transaction-row="true"
        {
            td class={ "px-6 py-4 text-right " (amount_class) } { (amount_str) }
            td class=(TABLE_CELL_STYLE)
            {
                time datetime=(date_datetime_attr(transaction.date)) { (transaction.date) }
            }
            td class=(TABLE_CELL_STYLE)
            {
                @if let Some(account_name) = account_name {
                    (account_name)
                } @else {
                    span class="text-gray-400 dark:text-gray-500" { "-" }
                }
            }
            td class=(TABLE_CELL_STYLE)
            {
                @if let Some(ref merchant_name) = transaction.merchant_name {
                    (merchant_name)
                } @else {
                    span class="text-gray-400 dark:text-gray-500" { "-" }
                }
            }
            td class=(TABLE_CELL_STYLE)
            {
                @if let Some(ref categories) = transaction.category {
                    div class="flex flex-wrap gap-1"
                    {
                        @for category in categories {
                            span class=(CATEGORY_BADGE_STYLE) { (category) }
                        }
                    }
                } @else {
                    span class="text-gray-400 dark:text-gray-500" { "-" }
                }
            }
        }
    }
}

fn not_connected_view() -> Markup {
    let nav_bar = NavBar::new(endpoints::TRANSACTIONS_VIEW).into_html();

    let content = html! {
        (nav_bar)

        main class=(PAGE_CONTAINER_STYLE)
        {
            section class="space-y-4"
            {
                h1 class="text-xl font-bold" { "Transactions" }

                p class="text-gray-500 dark:text-gray-400" data-not-connected="true"
                {
                    "No bank account is linked yet. "
                    (link(endpoints::DASHBOARD_VIEW, "Link an account from the dashboard"))
                    " to see transactions here."
                }
            }
        }
    };

    base("Transactions", &[], &content)
}

const DATE_ATTRIBUTE_FORMAT: &[BorrowedFormatItem] =
    format_description!("[year]-[month repr:numerical padding:zero]-[day padding:zero]");

fn date_datetime_attr(date: Date) -> String {
    date.format(DATE_ATTRIBUTE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

#[cfg(test)]
mod transactions_view_tests {
    use std::collections::HashMap;

    use scraper::{ElementRef, Html, Selector};
    use time::macros::date;

    use crate::{aggregator::TransactionRecord, endpoints, html::format_currency};

    use super::{not_connected_view, transactions_view};

    #[test]
    fn view_renders_transaction_rows() {
        let transactions = vec![
            TransactionRecord {
                account_id: "acc-1".to_owned(),
                merchant_name: Some("Uber".to_owned()),
                amount: 5.4,
                currency_code: Some("USD".to_owned()),
                date: date!(2024 - 06 - 01),
                category: Some(vec!["Travel".to_owned(), "Taxi".to_owned()]),
            },
            TransactionRecord {
                account_id: "acc-1".to_owned(),
                merchant_name: None,
                amount: -500.0,
                currency_code: Some("USD".to_owned()),
                date: date!(2024 - 05 - 30),
                category: None,
            },
        ];
        let account_names =
            HashMap::from([("acc-1".to_owned(), "Plaid Checking".to_owned())]);

        let markup = transactions_view(&transactions, &account_names);

        let html = Html::parse_document(&markup.into_string());
        assert_valid_html(&html);
        let rows = must_get_transaction_rows(&html, 2);

        let first_row_text = rows[0].text().collect::<String>();
        assert!(
            first_row_text.contains(&format_currency(5.4)),
            "want first row to contain {}, got {first_row_text}",
            format_currency(5.4)
        );
        assert!(first_row_text.contains("Plaid Checking"));
        assert!(first_row_text.contains("Uber"));
        assert!(first_row_text.contains("Travel"));
        assert!(first_row_text.contains("Taxi"));

        let second_row_text = rows[1].text().collect::<String>();
        assert!(
            second_row_text.contains(&format_currency(-500.0)),
            "want second row to contain {}, got {second_row_text}",
            format_currency(-500.0)
        );
    }

    #[test]
    fn view_renders_placeholder_for_missing_fields() {
        let transactions = vec![TransactionRecord {
            account_id: "acc-unknown".to_owned(),
            merchant_name: None,
            amount: 12.0,
            currency_code: None,
            date: date!(2024 - 06 - 01),
            category: None,
        }];
        let account_names = HashMap::new();

        let markup = transactions_view(&transactions, &account_names);

        let html = Html::parse_document(&markup.into_string());
        assert_valid_html(&html);
        let rows = must_get_transaction_rows(&html, 1);
        let cell_selector = Selector::parse("td span").unwrap();
        let placeholders = rows[0]
            .select(&cell_selector)
            .filter(|span| span.text().collect::<String>() == "-")
            .count();

        assert_eq!(
            placeholders, 3,
            "want placeholders for account, merchant and categories"
        );
    }

    #[test]
    fn view_shows_empty_state_without_transactions() {
        let markup = transactions_view(&[], &HashMap::new());

        let html = Html::parse_document(&markup.into_string());
        assert_valid_html(&html);
        let empty_state_selector = Selector::parse("td[data-empty-state='true']").unwrap();

        assert!(
            html.select(&empty_state_selector).next().is_some(),
            "could not find empty state cell in HTML"
        );
    }

    #[test]
    fn not_connected_view_links_to_dashboard() {
        let markup = not_connected_view();

        let html = Html::parse_document(&markup.into_string());
        assert_valid_html(&html);
        let link_selector =
            Selector::parse(&format!("a[href='{}']", endpoints::DASHBOARD_VIEW)).unwrap();

        assert!(
            html.select(&link_selector).next().is_some(),
            "could not find link to the dashboard in HTML"
        );
    }

    #[track_caller]
    fn must_get_transaction_rows(html: &Html, want_row_count: usize) -> Vec<ElementRef<'_>> {
        let row_selector = Selector::parse("tr[data-transaction-row='true']").unwrap();
        let rows = html.select(&row_selector).collect::<Vec<_>>();

        assert_eq!(
            rows.len(),
            want_row_count,
            "want {want_row_count} transaction rows, got {}",
            rows.len()
        );

        rows
    }

    #[track_caller]
    fn assert_valid_html(html: &Html) {
        assert!(
            html.errors.is_empty(),
            "Got HTML parsing errors: {:?}",
            html.errors
        );
    }
}
