//! French email copy for invoice notifications and the dunning sequence.

use crate::models::{Client, Invoice, ReminderType, User};
use crate::services::email::EmailMessage;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// `1954.58` → `1 954,58 $`
pub fn format_amount(amount: Decimal) -> String {
    let mut amount = amount.round_dp(2);
    amount.rescale(2);
    let text = amount.abs().to_string();
    let (units, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, digit) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push('\u{a0}');
        }
        grouped.push(digit);
    }

    let sign = if amount.is_sign_negative() { "-" } else { "" };
    format!("{}{},{}\u{a0}$", sign, grouped, cents)
}

/// `2025-03-15` → `15 mars 2025`
pub fn format_date(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn due_line(invoice: &Invoice) -> String {
    match invoice.due_date {
        Some(due) => format!("Date d'échéance : {}", format_date(due)),
        None => "Payable sur réception".to_string(),
    }
}

fn wrap_html(paragraphs: &[String], sender: &str) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", html_escape(p)))
        .collect();
    format!(
        "<!DOCTYPE html><html lang=\"fr\"><body style=\"font-family:Arial,sans-serif;color:#1f2933\">{}<p>{}</p></body></html>",
        body,
        html_escape(sender)
    )
}

fn compose(to: &str, subject: String, paragraphs: Vec<String>, sender: &str) -> EmailMessage {
    let mut body_text = paragraphs.join("\n\n");
    body_text.push_str("\n\n");
    body_text.push_str(sender);

    EmailMessage {
        to: to.to_string(),
        subject,
        body_html: wrap_html(&paragraphs, sender),
        body_text,
    }
}

/// Notification sent when an invoice is sent (or re-sent) to a client.
pub fn invoice_email(to: &str, user: &User, client: &Client, invoice: &Invoice) -> EmailMessage {
    let paragraphs = vec![
        format!("Bonjour {},", client.name),
        format!(
            "Veuillez trouver ci-joint la facture n° {} au montant de {}.",
            invoice.invoice_number,
            format_amount(invoice.total)
        ),
        due_line(invoice),
        "Merci de votre confiance.".to_string(),
    ];

    compose(
        to,
        format!("Facture n° {} de {}", invoice.invoice_number, user.name),
        paragraphs,
        &user.name,
    )
}

/// Dunning email for one checkpoint. Tone escalates with each step.
pub fn reminder_email(
    reminder_type: ReminderType,
    to: &str,
    user: &User,
    client: &Client,
    invoice: &Invoice,
) -> EmailMessage {
    let number = invoice.invoice_number;
    let total = format_amount(invoice.total);
    let due = invoice
        .due_date
        .map(format_date)
        .unwrap_or_else(|| "sur réception".to_string());

    let (subject, paragraphs) = match reminder_type {
        ReminderType::Reminder1 => (
            format!("Rappel : facture n° {} bientôt échue", number),
            vec![
                format!("Bonjour {},", client.name),
                format!(
                    "Petit rappel amical : la facture n° {} au montant de {} arrive à échéance le {}.",
                    number, total, due
                ),
                "Si le paiement a déjà été effectué, veuillez ignorer ce message.".to_string(),
            ],
        ),
        ReminderType::Reminder2 => (
            format!("Facture n° {} échue", number),
            vec![
                format!("Bonjour {},", client.name),
                format!(
                    "Sauf erreur de notre part, la facture n° {} au montant de {}, échue le {}, demeure impayée.",
                    number, total, due
                ),
                "Nous vous remercions de procéder au paiement dans les meilleurs délais.".to_string(),
            ],
        ),
        ReminderType::Reminder3 => (
            format!("Deuxième rappel : facture n° {} impayée", number),
            vec![
                format!("Bonjour {},", client.name),
                format!(
                    "Malgré notre précédent rappel, la facture n° {} au montant de {}, échue le {}, n'a toujours pas été réglée.",
                    number, total, due
                ),
                "Nous vous prions de régulariser la situation sans délai ou de communiquer avec nous.".to_string(),
            ],
        ),
        ReminderType::MiseEnDemeure => (
            format!("Mise en demeure : facture n° {}", number),
            vec![
                format!("{},", client.name),
                format!(
                    "La présente constitue une mise en demeure formelle de payer la somme de {} due au titre de la facture n° {}, échue le {}.",
                    total, number, due
                ),
                "À défaut de paiement dans un délai de dix (10) jours suivant la réception de la présente, des recours pourront être intentés sans autre avis ni délai.".to_string(),
                "Veuillez agir en conséquence.".to_string(),
            ],
        ),
    };

    compose(to, subject, paragraphs, &user.name)
}
