//! # Withholding and Perception Engine
//!
//! Computes the taxes attached to a purchase or sale document from a rule
//! table keyed by (direction, counterparty fiscal condition, document type).
//!
//! ## Pipeline
//!
//! 1. **VAT** — `net × vat_rate` when the document type discriminates VAT
//!    (invoices A and M), zero otherwise. `gross = net + vat`.
//!
//! 2. **Rule matching** — a rule applies when its direction, fiscal
//!    conditions and document types include the document's, the net amount
//!    reaches the rule's minimum, and the organization acts as agent for the
//!    rule's nature (withholding on purchases, perception on sales). Credit
//!    and debit notes never match.
//!
//! 3. **Lines** — `base × rate_bps / 10000`, truncated toward zero so a line
//!    never exceeds its statutory rate. Zero lines are dropped. Lines are
//!    sorted by rule id.
//!
//! 4. **Payable** — `gross − Σ withholdings + Σ perceptions`.
//!
//! ## Determinism
//!
//! The engine holds no mutable state. Identical documents produce identical
//! breakdowns.

use obra_core::{Amount, BPS_SCALE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Tax registration of a supplier or customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FiscalCondition {
    /// VAT-registered taxpayer.
    ResponsableInscripto,
    /// Simplified-regime taxpayer.
    Monotributista,
    /// VAT-exempt.
    Exento,
    /// Final consumer.
    ConsumidorFinal,
    /// Not registered with the tax authority.
    NoCategorizado,
}

impl FiscalCondition {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResponsableInscripto => "responsable_inscripto",
            Self::Monotributista => "monotributista",
            Self::Exento => "exento",
            Self::ConsumidorFinal => "consumidor_final",
            Self::NoCategorizado => "no_categorizado",
        }
    }
}

impl std::fmt::Display for FiscalCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of fiscal document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Invoice between VAT-registered parties.
    InvoiceA,
    /// Invoice to final consumers, exempt or simplified-regime parties.
    InvoiceB,
    /// Invoice issued by a simplified-regime or exempt party.
    InvoiceC,
    /// Invoice A issued under the mandatory-withholding regime.
    InvoiceM,
    /// Receipt.
    Receipt,
    /// Cash register ticket.
    Ticket,
    /// Credit note.
    CreditNote,
    /// Debit note.
    DebitNote,
}

impl DocumentType {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceA => "invoice_a",
            Self::InvoiceB => "invoice_b",
            Self::InvoiceC => "invoice_c",
            Self::InvoiceM => "invoice_m",
            Self::Receipt => "receipt",
            Self::Ticket => "ticket",
            Self::CreditNote => "credit_note",
            Self::DebitNote => "debit_note",
        }
    }

    /// Whether VAT is shown separately on the document.
    pub fn discriminates_vat(&self) -> bool {
        matches!(self, Self::InvoiceA | Self::InvoiceM)
    }

    /// Credit and debit notes adjust other documents and carry no taxes of
    /// their own here.
    pub fn is_note(&self) -> bool {
        matches!(self, Self::CreditNote | Self::DebitNote)
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the operation from the organization's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Expense: the organization pays and withholds.
    Purchase,
    /// Income: the organization collects and perceives.
    Sale,
}

/// Whether a tax is kept from a payment or added to a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaxNature {
    /// Kept from the amount paid to a supplier.
    Withholding,
    /// Added to the amount charged to a customer.
    Perception,
}

/// The specific tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaxKind {
    /// VAT withholding.
    VatWithholding,
    /// Income tax withholding.
    IncomeTaxWithholding,
    /// Gross income (provincial) withholding.
    GrossIncomeWithholding,
    /// VAT perception.
    VatPerception,
    /// Gross income (provincial) perception.
    GrossIncomePerception,
}

impl TaxKind {
    /// Withholding or perception.
    pub fn nature(&self) -> TaxNature {
        match self {
            Self::VatWithholding | Self::IncomeTaxWithholding | Self::GrossIncomeWithholding => {
                TaxNature::Withholding
            }
            Self::VatPerception | Self::GrossIncomePerception => TaxNature::Perception,
        }
    }

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VatWithholding => "vat_withholding",
            Self::IncomeTaxWithholding => "income_tax_withholding",
            Self::GrossIncomeWithholding => "gross_income_withholding",
            Self::VatPerception => "vat_perception",
            Self::GrossIncomePerception => "gross_income_perception",
        }
    }
}

/// Which document amount a rule's rate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaxBase {
    /// Amount before VAT.
    Net,
    /// The VAT amount.
    Vat,
    /// Net plus VAT.
    Gross,
}

// ---------------------------------------------------------------------------
// Rules, inputs and outputs
// ---------------------------------------------------------------------------

/// One row of the tax table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaxRule {
    /// Stable identifier, also the sort key of computed lines.
    pub id: String,
    /// The tax this rule computes.
    pub kind: TaxKind,
    /// Purchase rules withhold, sale rules perceive.
    pub direction: Direction,
    /// Counterparty conditions the rule applies to.
    pub fiscal_conditions: Vec<FiscalCondition>,
    /// Document types the rule applies to.
    pub document_types: Vec<DocumentType>,
    /// Amount the rate is applied to.
    pub base: TaxBase,
    /// Rate in basis points.
    pub rate_bps: u32,
    /// Minimum net amount for the rule to apply (inclusive).
    pub minimum_taxable: Amount,
    /// Human-readable description.
    pub description: String,
}

/// Whether the organization is registered to withhold and to perceive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentStatus {
    /// Registered withholding agent: purchase rules apply.
    pub withholding_agent: bool,
    /// Registered perception agent: sale rules apply.
    pub perception_agent: bool,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            withholding_agent: true,
            perception_agent: true,
        }
    }
}

/// The document being taxed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaxableDocument {
    /// Purchase or sale.
    pub direction: Direction,
    /// Fiscal condition of the supplier (purchase) or customer (sale).
    pub counterparty_condition: FiscalCondition,
    /// Document type.
    pub document_type: DocumentType,
    /// Amount before VAT. Must be positive.
    pub net_amount: Amount,
    /// VAT rate in basis points; ignored unless the document discriminates VAT.
    pub vat_rate_bps: u32,
    /// The organization's agent registrations.
    #[serde(default)]
    pub agent: AgentStatus,
}

/// One computed withholding or perception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaxLine {
    /// Rule that produced the line.
    pub rule_id: String,
    /// Tax kind.
    pub kind: TaxKind,
    /// Withholding or perception.
    pub nature: TaxNature,
    /// Base the rate was applied to.
    pub base: TaxBase,
    /// Value of that base.
    pub base_amount: Amount,
    /// Rate in basis points.
    pub rate_bps: u32,
    /// Computed amount.
    pub amount: Amount,
    /// Rule description.
    pub description: String,
}

/// Full tax computation for a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct TaxBreakdown {
    /// Amount before VAT.
    pub net: Amount,
    /// VAT rate applied (0 when not discriminated).
    pub vat_rate_bps: u32,
    /// VAT amount.
    pub vat: Amount,
    /// Net plus VAT.
    pub gross: Amount,
    /// Computed lines, sorted by rule id.
    pub lines: Vec<TaxLine>,
    /// Sum of withholding lines.
    pub withholdings: Amount,
    /// Sum of perception lines.
    pub perceptions: Amount,
    /// Gross minus withholdings plus perceptions.
    pub payable: Amount,
}

/// Rejections from rule loading and computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxError {
    /// Net amount is zero or negative.
    #[error("net amount must be positive, got {0}")]
    NonPositiveNet(Amount),

    /// A rate above 100 %.
    #[error("{what} rate {bps} bps exceeds 100%")]
    RateOutOfRange {
        /// The rate's owner (`"vat"` or a rule id).
        what: String,
        /// The offending rate.
        bps: u32,
    },

    /// Two rules share an id.
    #[error("duplicate tax rule id: {0}")]
    DuplicateRule(String),

    /// Arithmetic left the representable range.
    #[error("tax computation overflowed")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless evaluator over a validated rule table.
#[derive(Clone)]
pub struct TaxEngine {
    rules: Vec<TaxRule>,
}

impl TaxEngine {
    /// Build an engine, rejecting rates above 100 % and duplicate ids.
    pub fn new(mut rules: Vec<TaxRule>) -> Result<Self, TaxError> {
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        for pair in rules.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(TaxError::DuplicateRule(pair[0].id.clone()));
            }
        }
        if let Some(rule) = rules.iter().find(|r| r.rate_bps > BPS_SCALE) {
            return Err(TaxError::RateOutOfRange {
                what: rule.id.clone(),
                bps: rule.rate_bps,
            });
        }
        Ok(Self { rules })
    }

    /// Engine over [`standard_rules`].
    pub fn standard() -> Self {
        let mut rules = standard_rules();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Self { rules }
    }

    /// The loaded rules, sorted by id.
    pub fn rules(&self) -> &[TaxRule] {
        &self.rules
    }

    /// Compute VAT, withholdings, perceptions and the payable amount.
    pub fn compute(&self, doc: &TaxableDocument) -> Result<TaxBreakdown, TaxError> {
        if !doc.net_amount.is_positive() {
            return Err(TaxError::NonPositiveNet(doc.net_amount));
        }
        if doc.vat_rate_bps > BPS_SCALE {
            return Err(TaxError::RateOutOfRange {
                what: "vat".to_string(),
                bps: doc.vat_rate_bps,
            });
        }

        let net = doc.net_amount;
        let vat_rate_bps = if doc.document_type.discriminates_vat() {
            doc.vat_rate_bps
        } else {
            0
        };
        let vat = net.apply_bps(vat_rate_bps).ok_or(TaxError::Overflow)?;
        let gross = net.checked_add(vat).ok_or(TaxError::Overflow)?;

        let mut lines = Vec::new();
        for rule in self.rules.iter().filter(|r| Self::rule_matches(r, doc)) {
            let base_amount = match rule.base {
                TaxBase::Net => net,
                TaxBase::Vat => vat,
                TaxBase::Gross => gross,
            };
            let amount = base_amount
                .apply_bps(rule.rate_bps)
                .ok_or(TaxError::Overflow)?;
            if amount.is_zero() {
                continue;
            }
            lines.push(TaxLine {
                rule_id: rule.id.clone(),
                kind: rule.kind,
                nature: rule.kind.nature(),
                base: rule.base,
                base_amount,
                rate_bps: rule.rate_bps,
                amount,
                description: rule.description.clone(),
            });
        }
        lines.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

        let total = |nature: TaxNature| {
            Amount::checked_sum(
                lines
                    .iter()
                    .filter(|l| l.nature == nature)
                    .map(|l| l.amount),
            )
            .ok_or(TaxError::Overflow)
        };
        let withholdings = total(TaxNature::Withholding)?;
        let perceptions = total(TaxNature::Perception)?;
        let payable = gross
            .checked_sub(withholdings)
            .and_then(|v| v.checked_add(perceptions))
            .ok_or(TaxError::Overflow)?;

        tracing::debug!(
            direction = ?doc.direction,
            document_type = %doc.document_type,
            condition = %doc.counterparty_condition,
            net = %net,
            lines = lines.len(),
            payable = %payable,
            "computed tax breakdown"
        );

        Ok(TaxBreakdown {
            net,
            vat_rate_bps,
            vat,
            gross,
            lines,
            withholdings,
            perceptions,
            payable,
        })
    }

    fn rule_matches(rule: &TaxRule, doc: &TaxableDocument) -> bool {
        if doc.document_type.is_note() {
            return false;
        }
        if rule.direction != doc.direction {
            return false;
        }
        let agent = match rule.kind.nature() {
            TaxNature::Withholding => doc.agent.withholding_agent,
            TaxNature::Perception => doc.agent.perception_agent,
        };
        agent
            && rule.fiscal_conditions.contains(&doc.counterparty_condition)
            && rule.document_types.contains(&doc.document_type)
            && doc.net_amount >= rule.minimum_taxable
    }
}

impl Default for TaxEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for TaxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxEngine")
            .field("rules", &self.rules.iter().map(|r| &r.id).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Standard table
// ---------------------------------------------------------------------------

/// The default rule table.
pub fn standard_rules() -> Vec<TaxRule> {
    use DocumentType::*;
    use FiscalCondition::*;

    vec![
        TaxRule {
            id: "GAN-NC".into(),
            kind: TaxKind::IncomeTaxWithholding,
            direction: Direction::Purchase,
            fiscal_conditions: vec![NoCategorizado],
            document_types: vec![InvoiceA, InvoiceB, InvoiceC, InvoiceM, Receipt, Ticket],
            base: TaxBase::Net,
            rate_bps: 2800,
            minimum_taxable: Amount::ZERO,
            description: "Income tax withholding, unregistered supplier".into(),
        },
        TaxRule {
            id: "GAN-RI".into(),
            kind: TaxKind::IncomeTaxWithholding,
            direction: Direction::Purchase,
            fiscal_conditions: vec![ResponsableInscripto],
            document_types: vec![InvoiceA, InvoiceM],
            base: TaxBase::Net,
            rate_bps: 200,
            minimum_taxable: Amount::from_cents(100_000_00),
            description: "Income tax withholding, registered supplier".into(),
        },
        TaxRule {
            id: "IIBB-RET".into(),
            kind: TaxKind::GrossIncomeWithholding,
            direction: Direction::Purchase,
            fiscal_conditions: vec![ResponsableInscripto, Monotributista],
            document_types: vec![InvoiceA, InvoiceB, InvoiceC, InvoiceM],
            base: TaxBase::Net,
            rate_bps: 150,
            minimum_taxable: Amount::from_cents(10_000_00),
            description: "Gross income withholding".into(),
        },
        TaxRule {
            id: "IVA-RET-A".into(),
            kind: TaxKind::VatWithholding,
            direction: Direction::Purchase,
            fiscal_conditions: vec![ResponsableInscripto],
            document_types: vec![InvoiceA],
            base: TaxBase::Vat,
            rate_bps: 5000,
            minimum_taxable: Amount::from_cents(50_000_00),
            description: "VAT withholding on invoice A".into(),
        },
        TaxRule {
            id: "IVA-RET-M".into(),
            kind: TaxKind::VatWithholding,
            direction: Direction::Purchase,
            fiscal_conditions: vec![ResponsableInscripto],
            document_types: vec![InvoiceM],
            base: TaxBase::Vat,
            rate_bps: 10_000,
            minimum_taxable: Amount::ZERO,
            description: "Full VAT withholding on invoice M".into(),
        },
        TaxRule {
            id: "IIBB-PER".into(),
            kind: TaxKind::GrossIncomePerception,
            direction: Direction::Sale,
            fiscal_conditions: vec![ResponsableInscripto, Monotributista],
            document_types: vec![InvoiceA, InvoiceB],
            base: TaxBase::Net,
            rate_bps: 300,
            minimum_taxable: Amount::from_cents(5_000_00),
            description: "Gross income perception".into(),
        },
        TaxRule {
            id: "IVA-PER".into(),
            kind: TaxKind::VatPerception,
            direction: Direction::Sale,
            fiscal_conditions: vec![ResponsableInscripto],
            document_types: vec![InvoiceA],
            base: TaxBase::Net,
            rate_bps: 300,
            minimum_taxable: Amount::from_cents(5_000_00),
            description: "VAT perception on invoice A".into(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn purchase(condition: FiscalCondition, doc: DocumentType, net: &str) -> TaxableDocument {
        TaxableDocument {
            direction: Direction::Purchase,
            counterparty_condition: condition,
            document_type: doc,
            net_amount: Amount::parse(net).unwrap(),
            vat_rate_bps: 2100,
            agent: AgentStatus::default(),
        }
    }

    fn sale(condition: FiscalCondition, doc: DocumentType, net: &str) -> TaxableDocument {
        TaxableDocument {
            direction: Direction::Sale,
            ..purchase(condition, doc, net)
        }
    }

    fn rule_ids(b: &TaxBreakdown) -> Vec<&str> {
        b.lines.iter().map(|l| l.rule_id.as_str()).collect()
    }

    #[test]
    fn standard_rules_load() {
        let engine = TaxEngine::standard();
        assert_eq!(engine.rules().len(), 7);
        assert!(TaxEngine::new(standard_rules()).is_ok());
    }

    #[test]
    fn invoice_a_large_registered_supplier() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::ResponsableInscripto, DocumentType::InvoiceA, "200000"))
            .unwrap();
        assert_eq!(b.vat, Amount::parse("42000").unwrap());
        assert_eq!(b.gross, Amount::parse("242000").unwrap());
        assert_eq!(rule_ids(&b), vec!["GAN-RI", "IIBB-RET", "IVA-RET-A"]);
        // 2% of 200000 + 1.5% of 200000 + 50% of 42000
        assert_eq!(b.withholdings, Amount::parse("28000").unwrap());
        assert_eq!(b.perceptions, Amount::ZERO);
        assert_eq!(b.payable, Amount::parse("214000").unwrap());
    }

    #[test]
    fn small_invoice_a_only_crosses_iibb_minimum() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::ResponsableInscripto, DocumentType::InvoiceA, "20000"))
            .unwrap();
        assert_eq!(rule_ids(&b), vec!["IIBB-RET"]);
        assert_eq!(b.withholdings, Amount::parse("300").unwrap());
    }

    #[test]
    fn minimum_is_inclusive() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::Monotributista, DocumentType::InvoiceC, "10000"))
            .unwrap();
        assert_eq!(rule_ids(&b), vec!["IIBB-RET"]);
        let b = engine
            .compute(&purchase(FiscalCondition::Monotributista, DocumentType::InvoiceC, "9999.99"))
            .unwrap();
        assert!(b.lines.is_empty());
    }

    #[test]
    fn invoice_b_has_no_vat() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::Monotributista, DocumentType::InvoiceB, "1000"))
            .unwrap();
        assert_eq!(b.vat, Amount::ZERO);
        assert_eq!(b.vat_rate_bps, 0);
        assert_eq!(b.gross, b.net);
    }

    #[test]
    fn invoice_m_withholds_all_vat() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::ResponsableInscripto, DocumentType::InvoiceM, "1000"))
            .unwrap();
        assert_eq!(rule_ids(&b), vec!["IVA-RET-M"]);
        assert_eq!(b.withholdings, b.vat);
        assert_eq!(b.payable, b.net);
    }

    #[test]
    fn unregistered_supplier_withholds_28_percent() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::NoCategorizado, DocumentType::Receipt, "1000"))
            .unwrap();
        assert_eq!(rule_ids(&b), vec!["GAN-NC"]);
        assert_eq!(b.withholdings, Amount::parse("280").unwrap());
        assert_eq!(b.payable, Amount::parse("720").unwrap());
    }

    #[test]
    fn notes_never_match() {
        let engine = TaxEngine::standard();
        for doc in [DocumentType::CreditNote, DocumentType::DebitNote] {
            let b = engine
                .compute(&purchase(FiscalCondition::NoCategorizado, doc, "500000"))
                .unwrap();
            assert!(b.lines.is_empty());
            assert_eq!(b.payable, b.gross);
        }
    }

    #[test]
    fn sale_to_registered_customer_perceives() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&sale(FiscalCondition::ResponsableInscripto, DocumentType::InvoiceA, "10000"))
            .unwrap();
        assert_eq!(rule_ids(&b), vec!["IIBB-PER", "IVA-PER"]);
        assert_eq!(b.perceptions, Amount::parse("600").unwrap());
        assert_eq!(b.withholdings, Amount::ZERO);
        assert_eq!(b.payable, Amount::parse("12700").unwrap());
    }

    #[test]
    fn sale_to_final_consumer_has_no_lines() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&sale(FiscalCondition::ConsumidorFinal, DocumentType::InvoiceB, "10000"))
            .unwrap();
        assert!(b.lines.is_empty());
    }

    #[test]
    fn agent_flags_gate_rules() {
        let engine = TaxEngine::standard();
        let mut doc = purchase(FiscalCondition::NoCategorizado, DocumentType::Receipt, "1000");
        doc.agent.withholding_agent = false;
        assert!(engine.compute(&doc).unwrap().lines.is_empty());

        let mut doc = sale(FiscalCondition::ResponsableInscripto, DocumentType::InvoiceA, "10000");
        doc.agent.perception_agent = false;
        assert!(engine.compute(&doc).unwrap().lines.is_empty());
    }

    #[test]
    fn rejects_non_positive_net() {
        let engine = TaxEngine::standard();
        let doc = purchase(FiscalCondition::Exento, DocumentType::InvoiceC, "0");
        assert_eq!(engine.compute(&doc), Err(TaxError::NonPositiveNet(Amount::ZERO)));
    }

    #[test]
    fn rejects_vat_rate_over_100_percent() {
        let engine = TaxEngine::standard();
        let mut doc = purchase(FiscalCondition::Exento, DocumentType::InvoiceA, "10");
        doc.vat_rate_bps = 10_001;
        assert!(matches!(engine.compute(&doc), Err(TaxError::RateOutOfRange { .. })));
    }

    #[test]
    fn rejects_bad_rule_tables() {
        let mut rules = standard_rules();
        rules.push(rules[0].clone());
        assert_eq!(
            TaxEngine::new(rules).unwrap_err(),
            TaxError::DuplicateRule("GAN-NC".into())
        );

        let mut rules = standard_rules();
        rules[0].rate_bps = 20_000;
        assert!(matches!(
            TaxEngine::new(rules),
            Err(TaxError::RateOutOfRange { .. })
        ));
    }

    #[test]
    fn truncates_toward_zero() {
        let engine = TaxEngine::standard();
        let b = engine
            .compute(&purchase(FiscalCondition::NoCategorizado, DocumentType::Ticket, "0.03"))
            .unwrap();
        // 28% of 3 cents = 0.84 cents, truncated to 0 and dropped
        assert!(b.lines.is_empty());
    }

    fn any_condition() -> impl Strategy<Value = FiscalCondition> {
        prop::sample::select(vec![
            FiscalCondition::ResponsableInscripto,
            FiscalCondition::Monotributista,
            FiscalCondition::Exento,
            FiscalCondition::ConsumidorFinal,
            FiscalCondition::NoCategorizado,
        ])
    }

    fn any_document() -> impl Strategy<Value = DocumentType> {
        prop::sample::select(vec![
            DocumentType::InvoiceA,
            DocumentType::InvoiceB,
            DocumentType::InvoiceC,
            DocumentType::InvoiceM,
            DocumentType::Receipt,
            DocumentType::Ticket,
            DocumentType::CreditNote,
            DocumentType::DebitNote,
        ])
    }

    proptest! {
        #[test]
        fn breakdown_invariants(
            condition in any_condition(),
            document_type in any_document(),
            sell in any::<bool>(),
            net in 1i64..10_000_000_000,
            vat_rate_bps in 0u32..=BPS_SCALE,
        ) {
            let doc = TaxableDocument {
                direction: if sell { Direction::Sale } else { Direction::Purchase },
                counterparty_condition: condition,
                document_type,
                net_amount: Amount::from_cents(net),
                vat_rate_bps,
                agent: AgentStatus::default(),
            };
            let engine = TaxEngine::standard();
            let b = engine.compute(&doc).unwrap();

            for line in &b.lines {
                prop_assert!(line.amount.is_positive());
                prop_assert!(line.amount <= line.base_amount);
            }
            let expected = b.gross.cents() - b.withholdings.cents() + b.perceptions.cents();
            prop_assert_eq!(b.payable.cents(), expected);
            prop_assert_eq!(b.gross.cents(), b.net.cents() + b.vat.cents());

            let mut sorted = b.lines.clone();
            sorted.sort_by(|x, y| x.rule_id.cmp(&y.rule_id));
            prop_assert_eq!(&sorted, &b.lines);

            prop_assert_eq!(engine.compute(&doc).unwrap(), b);
        }
    }
}
