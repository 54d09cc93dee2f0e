use api_types::{
    Envelope, ErrorEnvelope,
    budget::BudgetDetailResponse,
    transaction::{
        SaveTransaction, SaveTransactionWrapper, SaveTransactionsResponse,
        SaveTransactionsWrapper, TransactionResponse, TransactionsResponse,
    },
};
use engine::{LedgerApi, TransactionQuery, TransportError};
use reqwest::{Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};

type TransportResult<T> = std::result::Result<T, TransportError>;

/// HTTP transport of the YNAB API.
#[derive(Debug, Clone)]
pub struct YnabClient {
    base_url: Url,
    token: String,
    http: reqwest::Client,
}

impl YnabClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        // Relative joins must keep the version segment.
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&base_url)
            .map_err(|err| AppError::Settings(format!("invalid base_url: {err}")))?;
        Ok(Self {
            base_url,
            token: token.to_string(),
            http: reqwest::Client::builder().build()?,
        })
    }

    fn endpoint(&self, path: &str) -> TransportResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Network(format!("invalid endpoint {path}: {err}")))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&impl Serialize>,
    ) -> TransportResult<T> {
        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let res = request
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = res.status();
        if status.is_success() {
            return res
                .json::<Envelope<T>>()
                .await
                .map(|envelope| envelope.data)
                .map_err(|err| TransportError::Decode(err.to_string()));
        }

        let error = res.json::<ErrorEnvelope>().await.ok();
        Err(api_error(status, error))
    }
}

fn api_error(status: StatusCode, error: Option<ErrorEnvelope>) -> TransportError {
    match error {
        Some(ErrorEnvelope { error }) => TransportError::Api {
            status: status.as_u16(),
            name: error.name,
            detail: error.detail,
        },
        None => TransportError::Api {
            status: status.as_u16(),
            name: status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_lowercase()
                .replace(' ', "_"),
            detail: String::new(),
        },
    }
}

fn transactions_url(mut url: Url, query: &TransactionQuery) -> Url {
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(since) = query.since_date {
            pairs.append_pair("since_date", &since.format("%Y-%m-%d").to_string());
        }
        if let Some(kind) = query.transaction_type {
            pairs.append_pair("type", kind.as_str());
        }
        if let Some(knowledge) = query.last_knowledge {
            pairs.append_pair("last_knowledge_of_server", &knowledge.to_string());
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}

const NO_BODY: Option<&()> = None;

impl LedgerApi for YnabClient {
    async fn list_transactions(
        &self,
        ledger_id: &str,
        query: &TransactionQuery,
    ) -> TransportResult<TransactionsResponse> {
        let url = self.endpoint(&format!("budgets/{ledger_id}/transactions"))?;
        self.send(Method::GET, transactions_url(url, query), NO_BODY).await
    }

    async fn get_ledger(&self, ledger_id: &str) -> TransportResult<BudgetDetailResponse> {
        let url = self.endpoint(&format!("budgets/{ledger_id}"))?;
        self.send(Method::GET, url, NO_BODY).await
    }

    async fn create_transaction(
        &self,
        ledger_id: &str,
        payload: SaveTransaction,
    ) -> TransportResult<SaveTransactionsResponse> {
        let url = self.endpoint(&format!("budgets/{ledger_id}/transactions"))?;
        let body = SaveTransactionWrapper {
            transaction: payload,
        };
        self.send(Method::POST, url, Some(&body)).await
    }

    async fn create_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> TransportResult<SaveTransactionsResponse> {
        let url = self.endpoint(&format!("budgets/{ledger_id}/transactions"))?;
        let body = SaveTransactionsWrapper {
            transactions: payloads,
        };
        self.send(Method::POST, url, Some(&body)).await
    }

    async fn update_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
        payload: SaveTransaction,
    ) -> TransportResult<TransactionResponse> {
        let url = self.endpoint(&format!(
            "budgets/{ledger_id}/transactions/{transaction_id}"
        ))?;
        let body = SaveTransactionWrapper {
            transaction: payload,
        };
        self.send(Method::PUT, url, Some(&body)).await
    }

    async fn update_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> TransportResult<SaveTransactionsResponse> {
        let url = self.endpoint(&format!("budgets/{ledger_id}/transactions"))?;
        let body = SaveTransactionsWrapper {
            transactions: payloads,
        };
        self.send(Method::PATCH, url, Some(&body)).await
    }

    async fn delete_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
    ) -> TransportResult<TransactionResponse> {
        let url = self.endpoint(&format!(
            "budgets/{ledger_id}/transactions/{transaction_id}"
        ))?;
        self.send(Method::DELETE, url, NO_BODY).await
    }
}
