//! Stripe gateway configuration and client

use std::future::Future;
use std::time::Duration;

use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    Client, CreateCustomer, CreateInvoice, CreateSubscription, CreateSubscriptionItems, Customer,
    CustomerId, Event, EventObject, EventType, Expandable, Invoice, ListInvoices,
    ListSubscriptions, PaymentSource, PaymentSourceParams, RequestStrategy, Subscription,
    UpdateCustomer, UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;
use tokio::time::timeout;

use crate::catalog::{resolve_plan, Tier};
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CardOnFile, EventKind, GatewayEvent, GatewayInvoice, GatewayLineItem, NewCustomer,
    PaymentGateway, SubscriptionSnapshot,
};

/// How many invoices a history fetch returns at most.
const INVOICE_PAGE_SIZE: u64 = 24;

/// Configuration for the Stripe gateway
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Price IDs for each paid tier
    pub price_ids: PriceIds,
    /// Upper bound on any single gateway call
    pub call_timeout: Duration,
}

/// Stripe price IDs for the paid subscription tiers
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub personal: String,
    pub team: String,
    pub enterprise: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let call_timeout = std::env::var("STRIPE_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(20), Duration::from_secs);

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            price_ids: PriceIds {
                personal: std::env::var("STRIPE_PRICE_PERSONAL").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_PERSONAL not set".to_string())
                })?,
                team: std::env::var("STRIPE_PRICE_TEAM")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_TEAM not set".to_string()))?,
                enterprise: std::env::var("STRIPE_PRICE_ENTERPRISE").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_ENTERPRISE not set".to_string())
                })?,
            },
            call_timeout,
        })
    }

    /// Get the price ID for a tier. Free has no price.
    pub fn price_id_for_tier(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Free => None,
            Tier::Personal => Some(&self.price_ids.personal),
            Tier::Team => Some(&self.price_ids.team),
            Tier::Enterprise => Some(&self.price_ids.enterprise),
        }
    }

    /// Resolve a public plan ID straight to its price ID.
    pub fn price_id_for_plan(&self, plan_id: &str) -> Option<&str> {
        resolve_plan(plan_id).and_then(|tier| self.price_id_for_tier(tier))
    }
}

/// Stripe-backed [`PaymentGateway`]
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

impl StripeGateway {
    /// Create a new gateway from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new gateway from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Run a gateway call under the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        match timeout(self.config.call_timeout, fut).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => Err(BillingError::Gateway(format!(
                "{op} timed out after {:?}",
                self.config.call_timeout
            ))),
        }
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::Gateway(format!("Invalid customer ID: {e}")))
    }

    /// Fetch the customer's single subscription. Every tenant has at most one.
    async fn subscription_for(&self, customer_id: &str) -> BillingResult<Subscription> {
        let customer_id = Self::parse_customer_id(customer_id)?;
        let params = ListSubscriptions {
            customer: Some(customer_id.clone()),
            ..Default::default()
        };
        let subs = self
            .bounded("list subscriptions", Subscription::list(&self.client, &params))
            .await?;
        subs.data.into_iter().next().ok_or_else(|| {
            BillingError::NotFound(format!("No subscription for customer {customer_id}"))
        })
    }

    async fn card_on_file(&self, customer_id: &CustomerId) -> BillingResult<Option<CardOnFile>> {
        let customer = self
            .bounded(
                "retrieve customer",
                Customer::retrieve(&self.client, customer_id, &["default_source"]),
            )
            .await?;

        let card = match customer.default_source {
            Some(Expandable::Object(source)) => match *source {
                PaymentSource::Card(card) => Some(CardOnFile {
                    brand: card.brand.clone().unwrap_or_default(),
                    last4: card.last4.clone().unwrap_or_default(),
                    exp_month: card.exp_month.unwrap_or(0),
                    exp_year: card.exp_year.unwrap_or(0),
                }),
                _ => None,
            },
            _ => None,
        };
        Ok(card)
    }
}

fn unix_to_datetime(ts: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| BillingError::Gateway(format!("Invalid timestamp from gateway: {e}")))
}

fn expandable_id<T: stripe::Object>(expandable: &Expandable<T>) -> String
where
    T::Id: ToString,
{
    match expandable {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(obj) => obj.id().to_string(),
    }
}

impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        email: &str,
        card_token: &str,
        plan_id: &str,
        idempotency_key: &str,
    ) -> BillingResult<NewCustomer> {
        let price_id = self
            .config
            .price_id_for_plan(plan_id)
            .ok_or_else(|| BillingError::Conflict(format!("Unknown plan: {plan_id}")))?
            .to_string();

        let token = card_token
            .parse()
            .map_err(|e| BillingError::Gateway(format!("Invalid card token: {e}")))?;

        // The idempotency key is persisted by the caller before we get here,
        // so a retried request replays the same customer + subscription
        // instead of creating a second one.
        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(idempotency_key.to_string()));

        let params = CreateCustomer {
            email: Some(email),
            source: Some(PaymentSourceParams::Token(token)),
            ..Default::default()
        };
        let customer = self
            .bounded("create customer", Customer::create(&client, params))
            .await?;

        let mut sub_params = CreateSubscription::new(customer.id.clone());
        sub_params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        let subscription = self
            .bounded("create subscription", Subscription::create(&client, sub_params))
            .await?;

        Ok(NewCustomer {
            customer_id: customer.id.to_string(),
            period_end: unix_to_datetime(subscription.current_period_end)?,
        })
    }

    async fn update_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
        prorate: bool,
    ) -> BillingResult<OffsetDateTime> {
        let price_id = self
            .config
            .price_id_for_plan(plan_id)
            .ok_or_else(|| BillingError::Conflict(format!("Unknown plan: {plan_id}")))?
            .to_string();

        let subscription = self.subscription_for(customer_id).await?;
        let item_id = subscription
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Gateway("Subscription has no items".to_string()))?;

        let proration_behavior = if prorate {
            SubscriptionProrationBehavior::CreateProrations
        } else {
            SubscriptionProrationBehavior::None
        };

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                ..Default::default()
            }]),
            proration_behavior: Some(proration_behavior),
            ..Default::default()
        };
        let updated = self
            .bounded(
                "update subscription",
                Subscription::update(&self.client, &subscription.id, params),
            )
            .await?;

        unix_to_datetime(updated.current_period_end)
    }

    async fn cancel_at_period_end(&self, customer_id: &str) -> BillingResult<()> {
        let subscription = self.subscription_for(customer_id).await?;
        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        self.bounded(
            "cancel subscription",
            Subscription::update(&self.client, &subscription.id, params),
        )
        .await?;
        Ok(())
    }

    async fn invoice_now(&self, customer_id: &str) -> BillingResult<()> {
        let customer_id = Self::parse_customer_id(customer_id)?;
        let mut params = CreateInvoice::new();
        params.customer = Some(customer_id);
        params.auto_advance = Some(true);

        match self
            .bounded("create invoice", Invoice::create(&self.client, params))
            .await
        {
            Ok(_) => Ok(()),
            // Stripe rejects invoice creation when the proration nets to
            // nothing; the plan change itself already succeeded.
            Err(BillingError::Gateway(msg)) if msg.contains("Nothing to invoice") => {
                tracing::debug!("No pending items to invoice");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_subscription(&self, customer_id: &str) -> BillingResult<SubscriptionSnapshot> {
        let subscription = self.subscription_for(customer_id).await?;
        let quantity = subscription
            .items
            .data
            .first()
            .and_then(|item| item.quantity)
            .unwrap_or(1);

        let customer_id = Self::parse_customer_id(customer_id)?;
        let card = self.card_on_file(&customer_id).await?;

        Ok(SubscriptionSnapshot {
            period_end: unix_to_datetime(subscription.current_period_end)?,
            card,
            quantity,
        })
    }

    async fn invoices(&self, customer_id: &str) -> BillingResult<Vec<GatewayInvoice>> {
        let customer_id = Self::parse_customer_id(customer_id)?;
        let mut params = ListInvoices::new();
        params.customer = Some(customer_id);
        params.limit = Some(INVOICE_PAGE_SIZE);

        let invoices = self
            .bounded("list invoices", Invoice::list(&self.client, &params))
            .await?;

        invoices
            .data
            .into_iter()
            .map(|invoice| {
                let lines = invoice
                    .lines
                    .as_ref()
                    .map(|lines| {
                        lines
                            .data
                            .iter()
                            .map(|line| GatewayLineItem {
                                id: line.id.to_string(),
                                amount: line.amount,
                                proration: line.proration,
                                description: line.description.clone(),
                                plan: line
                                    .price
                                    .as_ref()
                                    .and_then(|price| price.nickname.clone()),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(GatewayInvoice {
                    id: invoice.id.to_string(),
                    total: invoice.total.unwrap_or(0),
                    amount_due: invoice.amount_due.unwrap_or(0),
                    date: unix_to_datetime(invoice.created.unwrap_or(0))?,
                    paid: invoice.paid.unwrap_or(false),
                    lines,
                })
            })
            .collect()
    }

    async fn update_default_source(
        &self,
        customer_id: &str,
        card_token: &str,
    ) -> BillingResult<()> {
        let customer_id = Self::parse_customer_id(customer_id)?;
        let token = card_token
            .parse()
            .map_err(|e| BillingError::Gateway(format!("Invalid card token: {e}")))?;

        let params = UpdateCustomer {
            source: Some(PaymentSourceParams::Token(token)),
            ..Default::default()
        };
        self.bounded(
            "update default source",
            Customer::update(&self.client, &customer_id, params),
        )
        .await?;
        Ok(())
    }

    async fn verified_event(&self, event_id: &str) -> BillingResult<GatewayEvent> {
        let event_id = event_id
            .parse::<stripe::EventId>()
            .map_err(|e| BillingError::Gateway(format!("Invalid event ID: {e}")))?;

        // Fetching the event back by id is what authenticates it; the raw
        // webhook payload is only trusted for the id it carries.
        let event = self
            .bounded(
                "retrieve event",
                Event::retrieve(&self.client, &event_id, &[]),
            )
            .await?;

        let kind = match event.type_ {
            EventType::CustomerSubscriptionDeleted => EventKind::SubscriptionDeleted,
            EventType::ChargeFailed => EventKind::ChargeFailed,
            EventType::InvoicePaymentSucceeded => EventKind::PaymentSucceeded,
            other => EventKind::Other(other.to_string()),
        };

        let mut customer_id = None;
        let mut invoice_id = None;
        let mut failure_code = None;
        let mut failure_message = None;

        match &event.data.object {
            EventObject::Subscription(subscription) => {
                customer_id = Some(expandable_id(&subscription.customer));
            }
            EventObject::Charge(charge) => {
                customer_id = charge.customer.as_ref().map(expandable_id);
                failure_code = charge.failure_code.clone();
                failure_message = charge.failure_message.clone();
            }
            EventObject::Invoice(invoice) => {
                customer_id = invoice.customer.as_ref().map(expandable_id);
                invoice_id = Some(invoice.id.to_string());
            }
            _ => {}
        }

        Ok(GatewayEvent {
            id: event.id.to_string(),
            kind,
            customer_id,
            created: unix_to_datetime(event.created)?,
            invoice_id,
            failure_code,
            failure_message,
        })
    }
}
