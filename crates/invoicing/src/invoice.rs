use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use saledesk_core::{AggregateRoot, ClientId, EmployeeId, Entity, InvoiceId, ProductCode};

/// Header fields as submitted for create/update (no identifier yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeaderDraft {
    pub issue_date: NaiveDate,
    pub client_id: ClientId,
    pub employee_id: EmployeeId,
    pub status: String,
    pub memo: Option<String>,
}

impl InvoiceHeaderDraft {
    /// Bind the draft to a store-generated identifier.
    pub fn with_id(self, id: InvoiceId) -> InvoiceHeader {
        InvoiceHeader {
            id,
            issue_date: self.issue_date,
            client_id: self.client_id,
            employee_id: self.employee_id,
            status: self.status,
            memo: self.memo,
        }
    }
}

/// Persisted invoice header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub id: InvoiceId,
    pub issue_date: NaiveDate,
    pub client_id: ClientId,
    pub employee_id: EmployeeId,
    pub status: String,
    pub memo: Option<String>,
}

/// A validated line that has not been bound to a header yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub product: ProductCode,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl NewInvoiceLine {
    /// `quantity * unit_price`, or `None` when the product is not representable.
    pub fn amount(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }

    pub fn bind(self, invoice_id: InvoiceId) -> InvoiceLine {
        InvoiceLine {
            invoice_id,
            product: self.product,
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}

/// Composite identity of a line: one product per invoice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineKey {
    pub invoice_id: InvoiceId,
    pub product: ProductCode,
}

/// Persisted invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub invoice_id: InvoiceId,
    pub product: ProductCode,
    pub quantity: Decimal,
    /// Caller-supplied; never derived from the product catalogue.
    pub unit_price: Decimal,
}

impl InvoiceLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            invoice_id: self.invoice_id,
            product: self.product.clone(),
        }
    }

    /// `None` when `quantity * unit_price` overflows `Decimal`.
    pub fn amount(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price)
    }
}

impl Entity for InvoiceLine {
    type Id = ProductCode;

    fn id(&self) -> &Self::Id {
        &self.product
    }
}

/// Aggregate root: an invoice header together with its owned lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    header: InvoiceHeader,
    lines: Vec<InvoiceLine>,
}

impl Invoice {
    /// Assemble an aggregate from a header and the lines read for it.
    ///
    /// Lines belonging to another header are dropped; readers are expected to
    /// pass only matching lines, in persisted order.
    pub fn assemble(header: InvoiceHeader, lines: Vec<InvoiceLine>) -> Self {
        let id = header.id;
        let lines = lines.into_iter().filter(|l| l.invoice_id == id).collect();
        Self { header, lines }
    }

    pub fn header(&self) -> &InvoiceHeader {
        &self.header
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    /// Sum of `quantity * unit_price` over all lines; `None` on overflow.
    ///
    /// Bulk appends can grow a stored invoice past what a single submission
    /// was allowed to total, so readers must handle `None`.
    pub fn total(&self) -> Option<Decimal> {
        self.lines
            .iter()
            .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.amount()?))
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;
    type Child = InvoiceLine;

    fn id(&self) -> &Self::Id {
        &self.header.id
    }

    fn children(&self) -> &[Self::Child] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn header(id: i64) -> InvoiceHeader {
        InvoiceHeaderDraft {
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            client_id: ClientId::new(7),
            employee_id: EmployeeId::new(2),
            status: "OPEN".to_string(),
            memo: None,
        }
        .with_id(InvoiceId::new(id))
    }

    fn line(invoice: i64, product: &str, qty: &str, price: &str) -> InvoiceLine {
        NewInvoiceLine {
            product: ProductCode::parse(product).unwrap(),
            quantity: Decimal::from_str(qty).unwrap(),
            unit_price: Decimal::from_str(price).unwrap(),
        }
        .bind(InvoiceId::new(invoice))
    }

    #[test]
    fn assemble_keeps_only_own_lines_in_order() {
        let invoice = Invoice::assemble(
            header(101),
            vec![
                line(101, "P2", "1", "5.00"),
                line(102, "P9", "1", "1.00"),
                line(101, "P1", "2", "10.00"),
            ],
        );

        let products: Vec<_> = invoice.lines().iter().map(|l| l.product.as_str()).collect();
        assert_eq!(products, vec!["P2", "P1"]);
        assert_eq!(invoice.id(), &InvoiceId::new(101));
        assert_eq!(invoice.children().len(), 2);
    }

    #[test]
    fn total_sums_line_amounts() {
        let invoice = Invoice::assemble(
            header(101),
            vec![line(101, "P1", "2", "10.00"), line(101, "P2", "1", "5.00")],
        );
        assert_eq!(invoice.total(), Some(Decimal::from_str("25.00").unwrap()));
    }

    #[test]
    fn oversized_amounts_do_not_panic() {
        let huge = line(101, "P1", "100000000000000000000", "100000000000000000000");
        assert_eq!(huge.amount(), None);

        let near_max = "50000000000000000000000000000";
        let invoice = Invoice::assemble(
            header(101),
            vec![line(101, "P1", near_max, "1"), line(101, "P2", near_max, "1")],
        );
        assert!(invoice.lines().iter().all(|l| l.amount().is_some()));
        assert_eq!(invoice.total(), None);
    }

    #[test]
    fn line_identity_is_product_within_invoice() {
        let l = line(101, "P1", "2", "10.00");
        assert_eq!(l.id().as_str(), "P1");
        assert_eq!(
            l.key(),
            LineKey {
                invoice_id: InvoiceId::new(101),
                product: ProductCode::parse("P1").unwrap(),
            }
        );
    }
}
