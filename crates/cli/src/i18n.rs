//! Console labels in English and French
//!
//! The locale is always passed in explicitly; nothing here is global.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Fr,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "fr" => Ok(Locale::Fr),
            other => Err(format!("unsupported language '{}', expected en or fr", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    NoDevices,
    DevicesFound,
    UnknownManufacturer,
    UnknownProduct,
    Manufacturer,
    Product,
    Serial,
    MassStorage,
    Success,
    Failure,
    ConfirmDestructive,
    Aborted,
    DryRun,
}

/// Text for `label` in `locale`
pub fn text(locale: Locale, label: Label) -> &'static str {
    match (locale, label) {
        (Locale::En, Label::NoDevices) => "No USB devices found.",
        (Locale::Fr, Label::NoDevices) => "Aucun périphérique USB trouvé.",
        (Locale::En, Label::DevicesFound) => "USB device(s) found:",
        (Locale::Fr, Label::DevicesFound) => "périphérique(s) USB trouvé(s) :",
        (Locale::En, Label::UnknownManufacturer) => "Unknown Manufacturer",
        (Locale::Fr, Label::UnknownManufacturer) => "Fabricant inconnu",
        (Locale::En, Label::UnknownProduct) => "Unknown Product",
        (Locale::Fr, Label::UnknownProduct) => "Produit inconnu",
        (Locale::En, Label::Manufacturer) => "Manufacturer",
        (Locale::Fr, Label::Manufacturer) => "Fabricant",
        (Locale::En, Label::Product) => "Product",
        (Locale::Fr, Label::Product) => "Produit",
        (Locale::En, Label::Serial) => "Serial",
        (Locale::Fr, Label::Serial) => "Numéro de série",
        (Locale::En, Label::MassStorage) => "mass storage",
        (Locale::Fr, Label::MassStorage) => "stockage de masse",
        (Locale::En, Label::Success) => "Success",
        (Locale::Fr, Label::Success) => "Succès",
        (Locale::En, Label::Failure) => "Error",
        (Locale::Fr, Label::Failure) => "Erreur",
        (Locale::En, Label::ConfirmDestructive) => {
            "This operation can erase data on the device. Type 'yes' to continue:"
        }
        (Locale::Fr, Label::ConfirmDestructive) => {
            "Cette opération peut effacer les données du périphérique. Tapez 'oui' pour continuer :"
        }
        (Locale::En, Label::Aborted) => "Operation cancelled.",
        (Locale::Fr, Label::Aborted) => "Opération annulée.",
        (Locale::En, Label::DryRun) => "Would run",
        (Locale::Fr, Label::DryRun) => "Commande prévue",
    }
}

/// Whether `answer` confirms a destructive operation in `locale`
pub fn is_confirmation(locale: Locale, answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    match locale {
        Locale::En => answer == "yes",
        Locale::Fr => answer == "oui",
    }
}
