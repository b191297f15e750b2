//! Single-page invoice rendering with the built-in Helvetica font.

use chrono::{DateTime, Utc};
use lopdf::{
    Document, Object, Stream, dictionary,
    content::{Content, Operation},
};
use rust_decimal::Decimal;
use uuid::Uuid;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN_LEFT: i64 = 50;
const LINE_HEIGHT: i64 = 18;
/// Lines past this point would run off the bottom of the page.
const MAX_ITEM_LINES: usize = 30;

#[derive(Debug, Clone)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl InvoiceLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub invoice_number: String,
    pub order_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub currency: String,
    pub lines: Vec<InvoiceLine>,
    pub total: Decimal,
}

pub fn render_invoice(invoice: &InvoiceDocument) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let content = Content {
        operations: layout(invoice),
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => Object::Integer(1),
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(PAGE_WIDTH),
            Object::Integer(PAGE_HEIGHT),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

fn layout(invoice: &InvoiceDocument) -> Vec<Operation> {
    let currency = invoice.currency.to_uppercase();
    let mut ops = Vec::new();
    let mut y = PAGE_HEIGHT - 70;

    text(&mut ops, 22, MARGIN_LEFT, y, "Invoice");
    y -= LINE_HEIGHT * 2;
    text(
        &mut ops,
        11,
        MARGIN_LEFT,
        y,
        &format!("Invoice number: {}", invoice.invoice_number),
    );
    y -= LINE_HEIGHT;
    text(&mut ops, 11, MARGIN_LEFT, y, &format!("Order: {}", invoice.order_id));
    y -= LINE_HEIGHT;
    text(
        &mut ops,
        11,
        MARGIN_LEFT,
        y,
        &format!("Date: {}", invoice.issued_at.format("%Y-%m-%d %H:%M UTC")),
    );
    y -= LINE_HEIGHT * 2;

    text(&mut ops, 11, MARGIN_LEFT, y, "Item");
    text(&mut ops, 11, 330, y, "Qty");
    text(&mut ops, 11, 390, y, "Unit");
    text(&mut ops, 11, 480, y, "Subtotal");
    y -= LINE_HEIGHT;

    for line in invoice.lines.iter().take(MAX_ITEM_LINES) {
        text(&mut ops, 10, MARGIN_LEFT, y, &truncate(&line.description, 45));
        text(&mut ops, 10, 330, y, &line.quantity.to_string());
        text(&mut ops, 10, 390, y, &money(line.unit_price));
        text(&mut ops, 10, 480, y, &money(line.subtotal()));
        y -= LINE_HEIGHT;
    }
    if invoice.lines.len() > MAX_ITEM_LINES {
        let hidden = invoice.lines.len() - MAX_ITEM_LINES;
        text(&mut ops, 10, MARGIN_LEFT, y, &format!("... and {hidden} more items"));
        y -= LINE_HEIGHT;
    }

    y -= LINE_HEIGHT;
    text(
        &mut ops,
        13,
        390,
        y,
        &format!("Total: {} {}", money(invoice.total), currency),
    );
    y -= LINE_HEIGHT * 3;
    text(&mut ops, 11, MARGIN_LEFT, y, "Thank you for your order!");

    ops
}

fn text(ops: &mut Vec<Operation>, size: i64, x: i64, y: i64, value: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(b"F1".to_vec()), Object::Integer(size)],
    ));
    ops.push(Operation::new(
        "Td",
        vec![Object::Integer(x), Object::Integer(y)],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(latin_safe(value))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// The standard fonts only cover single-byte encodings.
fn latin_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(lines: usize) -> InvoiceDocument {
        InvoiceDocument {
            invoice_number: "INV-20240101120000-abcdef12".into(),
            order_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            currency: "usd".into(),
            lines: (0..lines)
                .map(|i| InvoiceLine {
                    description: format!("Item {i}"),
                    quantity: 2,
                    unit_price: dec!(10.00),
                })
                .collect(),
            total: dec!(20.00) * Decimal::from(lines as i64),
        }
    }

    #[test]
    fn renders_a_pdf_with_the_invoice_number() {
        let bytes = render_invoice(&sample(2)).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(haystack.contains("INV-20240101120000-abcdef12"));
        assert!(haystack.contains("Total: 40.00 USD"));
        assert!(haystack.contains("Thank you for your order"));
    }

    #[test]
    fn long_orders_are_summarised() {
        let bytes = render_invoice(&sample(MAX_ITEM_LINES + 5)).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("and 5 more items"));
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(latin_safe("Caf\u{e9} \u{2615}"), "Caf? ?");
    }

    #[test]
    fn subtotal_and_money_formatting() {
        let line = InvoiceLine {
            description: "Pen".into(),
            quantity: 3,
            unit_price: dec!(0.1),
        };
        assert_eq!(money(line.subtotal()), "0.30");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
