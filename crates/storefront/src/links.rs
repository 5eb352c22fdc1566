//! Outbound deep links: WhatsApp order hand-off and support email.

use rust_decimal::Decimal;

use dulcenube_core::Email;

use crate::cart::CartLine;
use crate::catalog::{Product, StoreInfo};

/// Greeting used by the generic "order on WhatsApp" button.
#[must_use]
pub fn greeting_message(store: &StoreInfo) -> String {
    format!("Hola, quiero hacer un pedido en {}", store.name)
}

/// Order summary for the cart, one numbered line per item.
#[must_use]
pub fn order_summary_message(lines: &[CartLine], store: &StoreInfo) -> String {
    let mut message = vec!["Hola, quiero confirmar este pedido:".to_string()];
    message.extend(lines.iter().enumerate().map(|(index, line)| {
        let dedication = line
            .personalization
            .as_deref()
            .map(|d| format!(" (Dedicatoria: {d})"))
            .unwrap_or_default();
        format!(
            "{}. {} x{} - {}{dedication}",
            index + 1,
            line.display_name,
            line.quantity,
            store.format(line.line_total()),
        )
    }));
    let total: Decimal = lines.iter().map(CartLine::line_total).sum();
    message.push(format!("Total: {}", store.format(total)));
    message.join("\n")
}

/// Inquiry for a single product from its detail page.
#[must_use]
pub fn product_inquiry_message(
    product: &Product,
    quantity: u32,
    dedication: Option<&str>,
    store: &StoreInfo,
) -> String {
    let dedication = dedication
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("sin dedicatoria");
    let total = product.price * Decimal::from(quantity);
    [
        "Hola, quiero hacer este pedido:".to_string(),
        format!("Producto: {}", product.name),
        format!("SKU: {}", product.sku),
        format!("Cantidad: {quantity}"),
        format!("Dedicatoria: {dedication}"),
        format!("Total estimado: {}", store.format(total)),
    ]
    .join("\n")
}

/// `https://wa.me/<phone>?text=<message>`.
#[must_use]
pub fn whatsapp_url(phone: &str, text: &str) -> String {
    format!("https://wa.me/{phone}?text={}", urlencoding::encode(text))
}

/// `mailto:` link for the support form.
#[must_use]
pub fn support_mailto(support: &Email, store: &StoreInfo, name: &str, from: &str, message: &str) -> String {
    let subject = format!("Soporte {}", store.name);
    let body = format!("Nombre: {name}\nEmail: {from}\n\nMensaje:\n{message}");
    format!(
        "mailto:{support}?subject={}&body={}",
        urlencoding::encode(&subject),
        urlencoding::encode(&body)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::testing::sample_catalog;
    use dulcenube_core::ProductId;

    fn line(name: &str, price: i64, quantity: u32, dedication: Option<&str>) -> CartLine {
        CartLine {
            key: format!("{name}::"),
            product_id: ProductId::new(name),
            display_name: name.to_string(),
            image_ref: String::new(),
            unit_price: Decimal::from(price),
            quantity,
            personalization: dedication.map(str::to_string),
        }
    }

    #[test]
    fn test_order_summary_message() {
        let lines = vec![
            line("Pastel de fresa", 450, 2, Some("Feliz cumple")),
            line("Galletas", 1200, 1, None),
        ];
        assert_eq!(
            order_summary_message(&lines, &StoreInfo::default()),
            "Hola, quiero confirmar este pedido:\n\
             1. Pastel de fresa x2 - $900 (Dedicatoria: Feliz cumple)\n\
             2. Galletas x1 - $1,200\n\
             Total: $2,100"
        );
    }

    #[test]
    fn test_product_inquiry_message() {
        let catalog = sample_catalog();
        let product = catalog.product(&ProductId::new("p1")).unwrap();
        let message = product_inquiry_message(product, 3, Some("  "), &catalog.store);
        assert_eq!(
            message,
            "Hola, quiero hacer este pedido:\n\
             Producto: Pastel de fresa\n\
             SKU: PAS-001\n\
             Cantidad: 3\n\
             Dedicatoria: sin dedicatoria\n\
             Total estimado: $1,350"
        );

        let message = product_inquiry_message(product, 1, Some(" Para Ana "), &catalog.store);
        assert!(message.contains("Dedicatoria: Para Ana\n"));
    }

    #[test]
    fn test_whatsapp_url_encodes_text() {
        let url = whatsapp_url(
            "525512345678",
            &greeting_message(&StoreInfo::default()),
        );
        assert_eq!(
            url,
            "https://wa.me/525512345678?text=Hola%2C%20quiero%20hacer%20un%20pedido%20en%20DulceNube"
        );
        assert!(whatsapp_url("1", "a\nb").ends_with("a%0Ab"));
    }

    #[test]
    fn test_support_mailto() {
        let support = Email::parse("soporte@dulcenube.com").unwrap();
        let link = support_mailto(&support, &StoreInfo::default(), "Ana", "ana@example.com", "Hola");
        assert_eq!(
            link,
            "mailto:soporte@dulcenube.com?subject=Soporte%20DulceNube\
             &body=Nombre%3A%20Ana%0AEmail%3A%20ana%40example.com%0A%0AMensaje%3A%0AHola"
        );
    }
}
